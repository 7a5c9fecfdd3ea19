//! Registration repository port.
//!
//! Registrations belong to the membership subsystem. The payment core reads
//! them for eligibility and writes exactly three things: the paid flag, the
//! cancelled flag and the link to the current transaction.

use async_trait::async_trait;
use uuid::Uuid;

use super::RepositoryResult;
use crate::domain::{ItemRef, Registration, RegistrationStatus, TransactionStatus};

#[async_trait]
pub trait RegistrationRepository: Send + Sync {
    async fn get_by_payer_and_item(
        &self,
        payer_id: i64,
        item: ItemRef,
    ) -> RepositoryResult<Option<Registration>>;

    async fn mark_paid(&self, registration_id: i64) -> RepositoryResult<()>;

    /// Leaves a `paid` or `attended` registration untouched.
    async fn mark_cancelled(&self, registration_id: i64) -> RepositoryResult<()>;

    async fn link_transaction(
        &self,
        registration_id: i64,
        transaction_id: Uuid,
    ) -> RepositoryResult<()>;

    /// Carries a transaction status change into its registration.
    async fn cascade(
        &self,
        registration_id: i64,
        status: TransactionStatus,
    ) -> RepositoryResult<()> {
        match status.registration_cascade() {
            Some(RegistrationStatus::Paid) => self.mark_paid(registration_id).await,
            Some(RegistrationStatus::Cancelled) => self.mark_cancelled(registration_id).await,
            _ => Ok(()),
        }
    }
}
