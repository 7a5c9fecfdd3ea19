use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{PaymentError, Transaction, TransactionStatus};

pub const PAID_MARKER: &str = "PAID";

/// Metadata encoded into a proof-of-payment artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProofPayload {
    pub transaction_id: Uuid,
    pub order_ref: String,
    pub gateway_reference: Option<String>,
    pub amount: String,
    pub paid_at: DateTime<Utc>,
    pub status: &'static str,
}

impl ProofPayload {
    /// `None` unless the transaction has been paid.
    pub fn for_transaction(tx: &Transaction) -> Option<Self> {
        if tx.status != TransactionStatus::Success {
            return None;
        }
        Some(Self {
            transaction_id: tx.id,
            order_ref: tx.order_ref.clone(),
            gateway_reference: tx.gateway_reference.clone(),
            amount: tx.gateway_amount(),
            paid_at: tx.paid_at?,
            status: PAID_MARKER,
        })
    }
}

#[async_trait]
pub trait ProofArtifactGenerator: Send + Sync {
    /// Renders and stores the artifact, returning its path relative to the
    /// artifact root. Repeated calls for one transaction overwrite one path.
    async fn generate(
        &self,
        transaction_id: Uuid,
        payload: &ProofPayload,
    ) -> Result<String, PaymentError>;
}
