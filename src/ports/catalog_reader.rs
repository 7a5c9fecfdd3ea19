//! Read-only reference data: priced items, payment methods and payer profiles.

use async_trait::async_trait;

use super::RepositoryResult;
use crate::domain::{ItemRef, PayerProfile, PaymentMethod, PurchasableItem};

#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_item(&self, item: ItemRef) -> RepositoryResult<Option<PurchasableItem>>;

    async fn get_payment_method(&self, code: &str) -> RepositoryResult<Option<PaymentMethod>>;

    async fn get_payer(&self, payer_id: i64) -> RepositoryResult<Option<PayerProfile>>;
}
