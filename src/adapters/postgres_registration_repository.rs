//! Postgres implementations of the registration and catalog ports.

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction as SqlxTransaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::queries;
use crate::domain::{
    ItemRef, PayerProfile, PaymentMethod, PurchasableItem, Registration, RegistrationStatus,
};
use crate::ports::{CatalogReader, RegistrationRepository, RepositoryError, RepositoryResult};

async fn find<'e, E: PgExecutor<'e>>(
    executor: E,
    payer_id: i64,
    item: ItemRef,
) -> RepositoryResult<Option<Registration>> {
    queries::get_registration_by_payer_and_item(executor, payer_id, item.kind, item.id)
        .await?
        .map(|row| row.into_domain())
        .transpose()
}

async fn set_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    status: RegistrationStatus,
) -> RepositoryResult<()> {
    if queries::set_registration_status(executor, id, status).await? == 0 {
        return Err(RepositoryError::NotFound(format!("registration {}", id)));
    }
    Ok(())
}

async fn link<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    transaction_id: Uuid,
) -> RepositoryResult<()> {
    if queries::link_registration_transaction(executor, id, transaction_id).await? == 0 {
        return Err(RepositoryError::NotFound(format!("registration {}", id)));
    }
    Ok(())
}

/// Registration repository over the connection pool; each write commits alone.
#[derive(Clone)]
pub struct PostgresRegistrationRepository {
    pool: PgPool,
}

impl PostgresRegistrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A repository whose writes join `db_tx` and commit or roll back with it.
    pub fn within<'t, 'c>(
        db_tx: &'t mut SqlxTransaction<'c, Postgres>,
    ) -> TransactionalRegistrations<'t, 'c> {
        TransactionalRegistrations {
            db_tx: Mutex::new(db_tx),
        }
    }
}

#[async_trait]
impl RegistrationRepository for PostgresRegistrationRepository {
    async fn get_by_payer_and_item(
        &self,
        payer_id: i64,
        item: ItemRef,
    ) -> RepositoryResult<Option<Registration>> {
        find(&self.pool, payer_id, item).await
    }

    async fn mark_paid(&self, id: i64) -> RepositoryResult<()> {
        set_status(&self.pool, id, RegistrationStatus::Paid).await
    }

    async fn mark_cancelled(&self, id: i64) -> RepositoryResult<()> {
        set_status(&self.pool, id, RegistrationStatus::Cancelled).await
    }

    async fn link_transaction(&self, id: i64, transaction_id: Uuid) -> RepositoryResult<()> {
        link(&self.pool, id, transaction_id).await
    }
}

/// Registration repository bound to an open database transaction.
pub struct TransactionalRegistrations<'t, 'c> {
    db_tx: Mutex<&'t mut SqlxTransaction<'c, Postgres>>,
}

#[async_trait]
impl<'t, 'c> RegistrationRepository for TransactionalRegistrations<'t, 'c> {
    async fn get_by_payer_and_item(
        &self,
        payer_id: i64,
        item: ItemRef,
    ) -> RepositoryResult<Option<Registration>> {
        let mut db_tx = self.db_tx.lock().await;
        find(&mut ***db_tx, payer_id, item).await
    }

    async fn mark_paid(&self, id: i64) -> RepositoryResult<()> {
        let mut db_tx = self.db_tx.lock().await;
        set_status(&mut ***db_tx, id, RegistrationStatus::Paid).await
    }

    async fn mark_cancelled(&self, id: i64) -> RepositoryResult<()> {
        let mut db_tx = self.db_tx.lock().await;
        set_status(&mut ***db_tx, id, RegistrationStatus::Cancelled).await
    }

    async fn link_transaction(&self, id: i64, transaction_id: Uuid) -> RepositoryResult<()> {
        let mut db_tx = self.db_tx.lock().await;
        link(&mut ***db_tx, id, transaction_id).await
    }
}

#[derive(Clone)]
pub struct PostgresCatalogReader {
    pool: PgPool,
}

impl PostgresCatalogReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogReader for PostgresCatalogReader {
    async fn get_item(&self, item: ItemRef) -> RepositoryResult<Option<PurchasableItem>> {
        let row = queries::get_item(&self.pool, item.kind, item.id).await?;
        Ok(row.map(|row| PurchasableItem {
            item: ItemRef::new(item.kind, row.id),
            label: row.title,
            fee: row.fee,
        }))
    }

    async fn get_payment_method(&self, code: &str) -> RepositoryResult<Option<PaymentMethod>> {
        Ok(queries::get_payment_method(&self.pool, code)
            .await?
            .map(PaymentMethod::from))
    }

    async fn get_payer(&self, payer_id: i64) -> RepositoryResult<Option<PayerProfile>> {
        Ok(queries::get_profile(&self.pool, payer_id)
            .await?
            .map(PayerProfile::from))
    }
}
