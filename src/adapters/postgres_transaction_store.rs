//! Postgres implementation of TransactionStore.
//!
//! Each mutating method runs in one database transaction. Creates lock the
//! registration row first, so concurrent creates for one registration queue
//! up behind each other; callbacks and overrides lock the transaction row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use uuid::Uuid;

use super::PostgresRegistrationRepository;
use crate::db::audit::{AuditLog, ENTITY_TRANSACTION};
use crate::db::models::TransactionRow;
use crate::db::queries;
use crate::domain::{PaymentError, Registration, ReservationPlan, Transaction, TransactionStatus};
use crate::ports::{
    CascadeOutcome, GatewayAck, NewTransaction, RegistrationRepository, RepositoryError,
    Reservation, StatusUpdate, TransactionStore,
};

const SYSTEM_ACTOR: &str = "system";

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_err(err: sqlx::Error) -> PaymentError {
    PaymentError::Store(RepositoryError::from(err))
}

fn domain(row: TransactionRow) -> Result<Transaction, PaymentError> {
    row.into_domain().map_err(PaymentError::from)
}

fn status_snapshot(tx: &Transaction) -> serde_json::Value {
    json!({
        "status": tx.status.as_str(),
        "gateway_reference": tx.gateway_reference,
    })
}

/// Inserts a fresh pending transaction and links it to its registration.
async fn mint(
    db_tx: &mut SqlxTransaction<'_, Postgres>,
    registration: &Registration,
    request: NewTransaction,
    now: DateTime<Utc>,
) -> Result<Transaction, PaymentError> {
    let fresh = Transaction::new(
        registration,
        request.amount,
        request.method_code,
        request.expiry,
        now,
    );
    let row = queries::insert_transaction(db_tx, &fresh)
        .await
        .map_err(db_err)?;
    let inserted = domain(row)?;

    PostgresRegistrationRepository::within(db_tx)
        .link_transaction(registration.id, inserted.id)
        .await?;

    AuditLog::log_creation(
        db_tx,
        inserted.id,
        ENTITY_TRANSACTION,
        json!({
            "order_ref": inserted.order_ref,
            "registration_id": inserted.registration_id,
            "amount": inserted.amount.to_string(),
            "method_code": inserted.method_code,
            "status": inserted.status.as_str(),
            "expires_at": inserted.expires_at,
        }),
        SYSTEM_ACTOR,
    )
    .await
    .map_err(db_err)?;

    Ok(inserted)
}

/// Moves a locked transaction to `status` and cascades into its registration.
#[allow(clippy::too_many_arguments)]
async fn transition(
    db_tx: &mut SqlxTransaction<'_, Postgres>,
    current: &Transaction,
    status: TransactionStatus,
    gateway_reference: Option<&str>,
    payload: Option<&serde_json::Value>,
    actor: &str,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Transaction, PaymentError> {
    let row = queries::update_transaction_status(
        db_tx,
        current.id,
        status,
        gateway_reference,
        payload,
        now,
    )
    .await
    .map_err(db_err)?;
    let updated = domain(row)?;

    PostgresRegistrationRepository::within(db_tx)
        .cascade(updated.registration_id, status)
        .await?;

    let mut new_val = status_snapshot(&updated);
    if let Some(notes) = notes {
        new_val["notes"] = json!(notes);
    }
    AuditLog::log_status_change(
        db_tx,
        updated.id,
        ENTITY_TRANSACTION,
        status_snapshot(current),
        new_val,
        actor,
    )
    .await
    .map_err(db_err)?;

    Ok(updated)
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn create_or_reuse(&self, request: NewTransaction) -> Result<Reservation, PaymentError> {
        let now = Utc::now();
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let registration = queries::lock_registration(&mut db_tx, request.registration_id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("registration {}", request.registration_id))
            })?
            .into_domain()?;

        let current = match queries::lock_current_transaction(&mut db_tx, registration.id)
            .await
            .map_err(db_err)?
        {
            Some(row) => Some(domain(row)?),
            None => None,
        };

        let plan = ReservationPlan::decide(&registration, current.as_ref(), now, request.claim_ttl);
        let reservation = match plan {
            ReservationPlan::AlreadyPaid(reference) => {
                return Err(PaymentError::AlreadyPaid(reference));
            }
            ReservationPlan::Ready(tx) => Reservation::Ready(tx),
            ReservationPlan::InFlight(tx) => Reservation::InFlight(tx),
            ReservationPlan::Reclaim(tx) => {
                let row = queries::claim_transaction(&mut db_tx, tx.id, now)
                    .await
                    .map_err(db_err)?;
                Reservation::Claimed(domain(row)?)
            }
            ReservationPlan::Supersede(stale) => {
                transition(
                    &mut db_tx,
                    &stale,
                    TransactionStatus::Expired,
                    None,
                    None,
                    SYSTEM_ACTOR,
                    None,
                    now,
                )
                .await?;
                Reservation::Claimed(mint(&mut db_tx, &registration, request, now).await?)
            }
            ReservationPlan::Mint => {
                Reservation::Claimed(mint(&mut db_tx, &registration, request, now).await?)
            }
        };

        db_tx.commit().await.map_err(db_err)?;
        Ok(reservation)
    }

    async fn record_gateway_ack(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
        ack: &GatewayAck,
    ) -> Result<Option<Transaction>, PaymentError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let row = match queries::record_gateway_ack(
            &mut db_tx,
            transaction_id,
            claimed_at,
            ack,
            Utc::now(),
        )
        .await
        .map_err(db_err)?
        {
            Some(row) => row,
            None => {
                db_tx.rollback().await.map_err(db_err)?;
                return Ok(None);
            }
        };

        AuditLog::log_field_update(
            &mut db_tx,
            transaction_id,
            ENTITY_TRANSACTION,
            "gateway_reference",
            json!(null),
            json!(ack.reference),
            SYSTEM_ACTOR,
        )
        .await
        .map_err(db_err)?;

        db_tx.commit().await.map_err(db_err)?;
        domain(row).map(Some)
    }

    async fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        let released = queries::release_claim(&self.pool, transaction_id, claimed_at)
            .await
            .map_err(db_err)?;
        if released == 0 {
            tracing::debug!(%transaction_id, "Gateway claim no longer held, nothing to release");
        }
        Ok(())
    }

    async fn apply_callback(
        &self,
        order_ref: &str,
        update: StatusUpdate,
    ) -> Result<CascadeOutcome, PaymentError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let current = queries::lock_transaction_by_order_ref(&mut db_tx, order_ref)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", order_ref)))
            .and_then(domain)?;

        if !current.status.can_transition_to(update.status) {
            db_tx.rollback().await.map_err(db_err)?;
            return Ok(CascadeOutcome {
                transaction: current,
                changed: false,
            });
        }

        let updated = transition(
            &mut db_tx,
            &current,
            update.status,
            update.gateway_reference.as_deref(),
            Some(&update.raw_payload),
            &update.actor,
            None,
            Utc::now(),
        )
        .await?;

        db_tx.commit().await.map_err(db_err)?;
        Ok(CascadeOutcome {
            transaction: updated,
            changed: true,
        })
    }

    async fn force_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        actor: &str,
        notes: &str,
    ) -> Result<CascadeOutcome, PaymentError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let current = queries::lock_transaction(&mut db_tx, transaction_id)
            .await
            .map_err(db_err)?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {}", transaction_id)))
            .and_then(domain)?;

        if current.status == status {
            db_tx.rollback().await.map_err(db_err)?;
            return Ok(CascadeOutcome {
                transaction: current,
                changed: false,
            });
        }
        if !current.status.can_transition_to(status) {
            return Err(PaymentError::InvalidTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let updated = transition(
            &mut db_tx,
            &current,
            status,
            None,
            None,
            actor,
            Some(notes),
            Utc::now(),
        )
        .await?;

        db_tx.commit().await.map_err(db_err)?;
        Ok(CascadeOutcome {
            transaction: updated,
            changed: true,
        })
    }

    async fn set_proof_path(&self, transaction_id: Uuid, path: &str) -> Result<(), PaymentError> {
        let affected = queries::set_proof_path(&self.pool, transaction_id, path)
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(PaymentError::NotFound(format!("transaction {}", transaction_id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, PaymentError> {
        queries::get_transaction(&self.pool, transaction_id)
            .await
            .map_err(db_err)?
            .map(domain)
            .transpose()
    }

    async fn find_by_order_ref(
        &self,
        order_ref: &str,
    ) -> Result<Option<Transaction>, PaymentError> {
        queries::get_transaction_by_order_ref(&self.pool, order_ref)
            .await
            .map_err(db_err)?
            .map(domain)
            .transpose()
    }

    async fn expire_stale(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, PaymentError> {
        let mut db_tx = self.pool.begin().await.map_err(db_err)?;

        let stale = queries::lock_stale_pending(&mut db_tx, now, limit)
            .await
            .map_err(db_err)?;

        let mut expired = 0;
        for row in stale {
            let current = domain(row)?;
            transition(
                &mut db_tx,
                &current,
                TransactionStatus::Expired,
                None,
                None,
                SYSTEM_ACTOR,
                None,
                now,
            )
            .await?;
            expired += 1;
        }

        db_tx.commit().await.map_err(db_err)?;
        Ok(expired)
    }
}
