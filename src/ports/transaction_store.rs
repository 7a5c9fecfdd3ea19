//! Transaction store port.
//!
//! The store is the only component allowed to mutate a transaction or cascade
//! into its registration. Every method that writes is one atomic unit of work:
//! other callers observe either all of its effects or none of them.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::GatewayAck;
use crate::domain::{PaymentError, Transaction, TransactionStatus};

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub registration_id: i64,
    pub amount: BigDecimal,
    pub method_code: String,
    pub expiry: Duration,
    /// How long a gateway claim is honoured before another caller may take it over.
    pub claim_ttl: Duration,
}

/// Result of `create_or_reuse`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The caller owns the gateway request for this transaction.
    Claimed(Transaction),
    /// The transaction already carries a gateway acknowledgement.
    Ready(Transaction),
    /// Another caller is requesting payment for this transaction.
    InFlight(Transaction),
}

impl Reservation {
    pub fn transaction(&self) -> &Transaction {
        match self {
            Reservation::Claimed(tx) | Reservation::Ready(tx) | Reservation::InFlight(tx) => tx,
        }
    }
}

/// A gateway-originated status change (callback or reconciliation).
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub gateway_reference: Option<String>,
    pub raw_payload: serde_json::Value,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeOutcome {
    pub transaction: Transaction,
    /// False when the call was a no-op against an already terminal transaction.
    pub changed: bool,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Returns the registration's live transaction or mints a new one.
    ///
    /// # Errors
    ///
    /// - `AlreadyPaid` if the registration is settled
    /// - `NotFound` if the registration does not exist
    async fn create_or_reuse(&self, request: NewTransaction) -> Result<Reservation, PaymentError>;

    /// Stores the gateway's acknowledgement and releases the claim.
    ///
    /// `claimed_at` is the claim the caller took. Returns `None` when the
    /// transaction is no longer pending or the claim was taken over.
    async fn record_gateway_ack(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
        ack: &GatewayAck,
    ) -> Result<Option<Transaction>, PaymentError>;

    /// Releases a claim after a failed gateway call so a retry can take it.
    /// A claim that was taken over, or a transaction that left `pending`,
    /// is left alone.
    async fn release_claim(
        &self,
        transaction_id: Uuid,
        claimed_at: DateTime<Utc>,
    ) -> Result<(), PaymentError>;

    /// Applies a gateway status and cascades into the registration.
    /// A call against a terminal transaction is a no-op.
    async fn apply_callback(
        &self,
        order_ref: &str,
        update: StatusUpdate,
    ) -> Result<CascadeOutcome, PaymentError>;

    /// Administrative status change with the same cascade as `apply_callback`.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the transaction is terminal with another status
    async fn force_status(
        &self,
        transaction_id: Uuid,
        status: TransactionStatus,
        actor: &str,
        notes: &str,
    ) -> Result<CascadeOutcome, PaymentError>;

    async fn set_proof_path(&self, transaction_id: Uuid, path: &str) -> Result<(), PaymentError>;

    async fn find_by_id(&self, transaction_id: Uuid) -> Result<Option<Transaction>, PaymentError>;

    async fn find_by_order_ref(&self, order_ref: &str)
        -> Result<Option<Transaction>, PaymentError>;

    /// Persists `expired` for up to `limit` stale pending transactions.
    async fn expire_stale(&self, now: DateTime<Utc>, limit: i64) -> Result<u64, PaymentError>;
}
