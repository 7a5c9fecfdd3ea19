//! In-memory payment store.
//!
//! Implements every storage port over one lock, so each operation is atomic
//! the same way a database transaction is. Used by tests and local runs
//! without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::audit::{ACTION_CREATED, ACTION_FIELD_UPDATED, ACTION_STATUS_CHANGED};
use crate::domain::{
    mint_order_ref, ItemRef, PayerProfile, PaymentError, PaymentMethod, PurchasableItem,
    Registration, RegistrationStatus, ReservationPlan, Transaction, TransactionStatus,
};
use crate::ports::{
    CascadeOutcome, CatalogReader, GatewayAck, NewTransaction, RegistrationRepository,
    RepositoryError, RepositoryResult, Reservation, StatusUpdate, TransactionStore,
};

const SYSTEM_ACTOR: &str = "system";

/// One row of the in-memory audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub entity_id: Uuid,
    pub action: &'static str,
    pub old_val: Option<Value>,
    pub new_val: Option<Value>,
    pub actor: String,
}

#[derive(Debug, Default)]
struct State {
    payers: HashMap<i64, PayerProfile>,
    items: HashMap<ItemRef, PurchasableItem>,
    methods: HashMap<String, PaymentMethod>,
    registrations: HashMap<i64, Registration>,
    transactions: HashMap<Uuid, Transaction>,
    audit: Vec<AuditEntry>,
    next_registration_id: i64,
}

impl State {
    fn registration_mut(&mut self, id: i64) -> RepositoryResult<&mut Registration> {
        self.registrations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("registration {}", id)))
    }

    fn current_transaction(&self, registration_id: i64) -> Option<&Transaction> {
        self.transactions
            .values()
            .filter(|tx| tx.registration_id == registration_id)
            .max_by_key(|tx| (tx.status == TransactionStatus::Pending, tx.created_at))
    }

    fn by_order_ref(&self, order_ref: &str) -> Option<&Transaction> {
        self.transactions.values().find(|tx| tx.order_ref == order_ref)
    }

    fn mark_paid(&mut self, id: i64) -> RepositoryResult<()> {
        self.registration_mut(id)?.status = RegistrationStatus::Paid;
        Ok(())
    }

    fn mark_cancelled(&mut self, id: i64) -> RepositoryResult<()> {
        let registration = self.registration_mut(id)?;
        if !registration.status.is_settled() {
            registration.status = RegistrationStatus::Cancelled;
        }
        Ok(())
    }

    fn link_transaction(&mut self, id: i64, transaction_id: Uuid) -> RepositoryResult<()> {
        self.registration_mut(id)?.transaction_id = Some(transaction_id);
        Ok(())
    }

    fn cascade(&mut self, registration_id: i64, status: TransactionStatus) -> RepositoryResult<()> {
        match status.registration_cascade() {
            Some(RegistrationStatus::Paid) => self.mark_paid(registration_id),
            Some(RegistrationStatus::Cancelled) => self.mark_cancelled(registration_id),
            _ => Ok(()),
        }
    }

    fn transition(
        &mut self,
        id: Uuid,
        status: TransactionStatus,
        update: Option<(&Option<String>, &Value)>,
        actor: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Transaction, PaymentError> {
        let registration_id = self
            .transactions
            .get(&id)
            .ok_or_else(|| not_found(format!("transaction {}", id)))?
            .registration_id;
        self.cascade(registration_id, status)?;

        let tx = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("transaction {}", id)))?;
        let old_val = status_snapshot(tx);

        tx.transition_to(status, now);
        if let Some((reference, payload)) = update {
            if reference.is_some() {
                tx.gateway_reference = reference.clone();
            }
            tx.callback_payload = Some(payload.clone());
        }
        let updated = tx.clone();

        let mut new_val = status_snapshot(&updated);
        if let Some(notes) = notes {
            new_val["notes"] = json!(notes);
        }
        self.audit.push(AuditEntry {
            entity_id: id,
            action: ACTION_STATUS_CHANGED,
            old_val: Some(old_val),
            new_val: Some(new_val),
            actor: actor.to_string(),
        });

        Ok(updated)
    }

    fn mint(
        &mut self,
        registration_id: i64,
        request: NewTransaction,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Transaction> {
        let registration = self.registration_mut(registration_id)?.clone();
        let mut fresh = Transaction::new(
            &registration,
            request.amount,
            request.method_code,
            request.expiry,
            now,
        );

        // Order references carry millisecond precision; a supersede within the
        // same millisecond must still get a fresh one.
        let mut bump = 1;
        while self.by_order_ref(&fresh.order_ref).is_some() {
            fresh.order_ref = mint_order_ref(
                registration.payer_id,
                registration.item,
                now + Duration::milliseconds(bump),
            );
            bump += 1;
        }

        self.link_transaction(registration_id, fresh.id)?;
        self.transactions.insert(fresh.id, fresh.clone());
        self.audit.push(AuditEntry {
            entity_id: fresh.id,
            action: ACTION_CREATED,
            old_val: None,
            new_val: Some(json!({
                "order_ref": fresh.order_ref,
                "registration_id": fresh.registration_id,
                "amount": fresh.amount.to_string(),
                "method_code": fresh.method_code,
                "status": fresh.status.as_str(),
            })),
            actor: SYSTEM_ACTOR.to_string(),
        });

        Ok(fresh)
    }
}

fn status_snapshot(tx: &Transaction) -> Value {
    json!({
        "status": tx.status.as_str(),
        "gateway_reference": tx.gateway_reference,
    })
}

fn holds_claim(tx: &Transaction, claimed_at: DateTime<Utc>) -> bool {
    tx.status == TransactionStatus::Pending && tx.gateway_claimed_at == Some(claimed_at)
}

fn not_found(what: impl std::fmt::Display) -> PaymentError {
    PaymentError::NotFound(what.to_string())
}

/// In-memory implementation of the transaction, registration and catalog ports.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_payer(&self, payer: PayerProfile) {
        self.state.write().await.payers.insert(payer.id, payer);
    }

    pub async fn add_item(&self, item: PurchasableItem) {
        self.state.write().await.items.insert(item.item, item);
    }

    pub async fn add_payment_method(&self, method: PaymentMethod) {
        self.state
            .write()
            .await
            .methods
            .insert(method.code.clone(), method);
    }

    /// Registers `payer_id` for `item` and returns the new registration.
    pub async fn register(&self, payer_id: i64, item: ItemRef) -> Registration {
        let mut state = self.state.write().await;
        state.next_registration_id += 1;
        let registration = Registration {
            id: state.next_registration_id,
            payer_id,
            item,
            status: RegistrationStatus::Registered,
            transaction_id: None,
        };
        state
            .registrations
            .insert(registration.id, registration.clone());
        registration
    }

    pub async fn registration(&self, id: i64) -> Option<Registration> {
        self.state.read().await.registrations.get(&id).cloned()
    }

    pub async fn set_registration_status(&self, id: i64, status: RegistrationStatus) {
        if let Some(registration) = self.state.write().await.registrations.get_mut(&id) {
            registration.status = status;
        }
    }

    /// All transactions of a registration, oldest first.
    pub async fn transactions_for(&self, registration_id: i64) -> Vec<Transaction> {
        let state = self.state.read().await;
        let mut found: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.registration_id == registration_id)
            .cloned()
            .collect();
        found.sort_by_key(|tx| tx.created_at);
        found
    }

    /// Moves a transaction's deadline, e.g. to simulate the passage of time.
    pub async fn set_expires_at(&self, transaction_id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(tx) = self.state.write().await.transactions.get_mut(&transaction_id) {
            tx.expires_at = expires_at;
        }
    }

    pub async fn audit_entries(&self, entity_id: Uuid) -> Vec<AuditEntry> {
        self.state
            .read()
            .await
            .audit
            .iter()
            .filter(|entry| entry.entity_id == entity_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryPaymentStore {
    async fn create_or_reuse(&self, request: NewTransaction) -> Result<Reservation, PaymentError> {
        let now = Utc::now();
        let mut state = self.state.write().await;

        let registration = state
            .registrations
            .get(&request.registration_id)
            .cloned()
            .ok_or_else(|| not_found(format!("registration {}", request.registration_id)))?;
        let current = state.current_transaction(registration.id).cloned();

        match ReservationPlan::decide(&registration, current.as_ref(), now, request.claim_ttl) {
            ReservationPlan::AlreadyPaid(reference) => Err(PaymentError::AlreadyPaid(reference)),
            ReservationPlan::Ready(tx) => Ok(Reservation::Ready(tx)),
            ReservationPlan::InFlight(tx) => Ok(Reservation::InFlight(tx)),
            ReservationPlan::Reclaim(tx) => {
                let claimed = state
                    .transactions
                    .get_mut(&tx.id)
                    .ok_or_else(|| not_found(format!("transaction {}", tx.id)))?;
                claimed.gateway_claimed_at = Some(now);
                claimed.updated_at = now;
                Ok(Reservation::Claimed(claimed.clone()))
            }
            ReservationPlan::Supersede(stale) => {
                state.transition(stale.id, TransactionStatus::Expired, None, SYSTEM_ACTOR, None, now)?;
                Ok(Reservation::Claimed(state.mint(registration.id, request, now)?))
            }
            ReservationPlan::Mint => Ok(Reservation::Claimed(state.mint(
                registration.id,
                request,
                now,
            )?)),
        }
    }

    async fn record_gateway_ack(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
        ack: &GatewayAck,
    ) -> Result<Option<Transaction>, PaymentError> {
        let mut state = self.state.write().await;
        let tx = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| not_found(format!("transaction {}", transaction_id)))?;
        if !holds_claim(tx, claimed_at) {
            return Ok(None);
        }

        tx.gateway_reference = Some(ack.reference.clone());
        tx.payment_url = ack.payment_url.clone();
        tx.va_number = ack.va_number.clone();
        tx.qr_payload = ack.qr_payload.clone();
        tx.gateway_claimed_at = None;
        tx.updated_at = Utc::now();
        let updated = tx.clone();

        state.audit.push(AuditEntry {
            entity_id: transaction_id,
            action: ACTION_FIELD_UPDATED,
            old_val: Some(json!({ "gateway_reference": null })),
            new_val: Some(json!({ "gateway_reference": ack.reference })),
            actor: SYSTEM_ACTOR.to_string(),
        });

        Ok(Some(updated))
    }

    async fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if let Some(tx) = self.state.write().await.transactions.get_mut(&transaction_id) {
            if holds_claim(tx, claimed_at) {
                tx.gateway_claimed_at = None;
                tx.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn apply_callback(
        &self,
        order_ref: &str,
        update: StatusUpdate,
    ) -> Result<CascadeOutcome, PaymentError> {
        let mut state = self.state.write().await;
        let current = state
            .by_order_ref(order_ref)
            .cloned()
            .ok_or_else(|| not_found(format!("transaction {}", order_ref)))?;

        if !current.status.can_transition_to(update.status) {
            return Ok(CascadeOutcome {
                transaction: current,
                changed: false,
            });
        }

        let updated = state.transition(
            current.id,
            update.status,
            Some((&update.gateway_reference, &update.raw_payload)),
            &update.actor,
            None,
            Utc::now(),
        )?;
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
        let mut state = self.state.write().await;
        let current = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| not_found(format!("transaction {}", transaction_id)))?;

        if current.status == status {
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

        let updated =
            state.transition(transaction_id, status, None, actor, Some(notes), Utc::now())?;
        Ok(CascadeOutcome {
            transaction: updated,
            changed: true,
        })
    }

    async fn set_proof_path(&self, transaction_id: Uuid, path: &str) -> Result<(), PaymentError> {
        let mut state = self.state.write().await;
        let tx = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or_else(|| not_found(format!("transaction {}", transaction_id)))?;
        tx.proof_path = Some(path.to_string());
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, PaymentError> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .get(&transaction_id)
            .cloned())
    }

    async fn find_by_order_ref(
        &self,
        order_ref: &str,
    ) -> Result<Option<Transaction>, PaymentError> {
        Ok(self.state.read().await.by_order_ref(order_ref).cloned())
    }

    async fn expire_stale(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, PaymentError> {
        let mut state = self.state.write().await;
        let mut stale: Vec<(DateTime<Utc>, Uuid)> = state
            .transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending && tx.is_expired_at(now))
            .map(|tx| (tx.expires_at, tx.id))
            .collect();
        stale.sort();
        stale.truncate(limit.max(0) as usize);

        for (_, id) in &stale {
            state.transition(*id, TransactionStatus::Expired, None, SYSTEM_ACTOR, None, now)?;
        }
        Ok(stale.len() as u64)
    }
}

#[async_trait]
impl RegistrationRepository for InMemoryPaymentStore {
    async fn get_by_payer_and_item(
        &self,
        payer_id: i64,
        item: ItemRef,
    ) -> RepositoryResult<Option<Registration>> {
        Ok(self
            .state
            .read()
            .await
            .registrations
            .values()
            .find(|reg| reg.payer_id == payer_id && reg.item == item)
            .cloned())
    }

    async fn mark_paid(&self, id: i64) -> RepositoryResult<()> {
        self.state.write().await.mark_paid(id)
    }

    async fn mark_cancelled(&self, id: i64) -> RepositoryResult<()> {
        self.state.write().await.mark_cancelled(id)
    }

    async fn link_transaction(&self, id: i64, transaction_id: Uuid) -> RepositoryResult<()> {
        self.state.write().await.link_transaction(id, transaction_id)
    }
}

#[async_trait]
impl CatalogReader for InMemoryPaymentStore {
    async fn get_item(&self, item: ItemRef) -> RepositoryResult<Option<PurchasableItem>> {
        Ok(self.state.read().await.items.get(&item).cloned())
    }

    async fn get_payment_method(&self, code: &str) -> RepositoryResult<Option<PaymentMethod>> {
        Ok(self.state.read().await.methods.get(code).cloned())
    }

    async fn get_payer(&self, payer_id: i64) -> RepositoryResult<Option<PayerProfile>> {
        Ok(self.state.read().await.payers.get(&payer_id).cloned())
    }
}
