//! Payment gateway port.
//!
//! The gateway is the authority on whether money moved. Implementations sign
//! every request and report transport trouble separately from refusals so the
//! orchestrator can decide whether a retry makes sense.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{PayerProfile, PaymentError, Transaction};

/// Gateway result code meaning "paid" / "accepted".
pub const RESULT_SUCCESS: &str = "00";
/// Gateway status code meaning "still waiting for the payer".
pub const RESULT_PENDING: &str = "01";
/// Gateway status code meaning "failed or cancelled".
pub const RESULT_FAILED: &str = "02";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered 2xx with a non-success status code. Carries the
    /// gateway's status message only.
    #[error("rejected by gateway: {0}")]
    Rejected(String),

    /// Network failure, timeout, any non-2xx answer or an open circuit.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

impl From<GatewayError> for PaymentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(message) => PaymentError::GatewayRejected(message),
            GatewayError::Unavailable(message) => PaymentError::GatewayUnavailable(message),
        }
    }
}

/// Acknowledgement of a payment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayAck {
    pub reference: String,
    pub payment_url: Option<String>,
    pub va_number: Option<String>,
    pub qr_payload: Option<String>,
}

/// Raw status report; interpretation is left to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayStatus {
    pub result_code: String,
    pub reference: Option<String>,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_payment(
        &self,
        transaction: &Transaction,
        payer: &PayerProfile,
        item_label: &str,
    ) -> Result<GatewayAck, GatewayError>;

    async fn query_status(&self, order_ref: &str) -> Result<GatewayStatus, GatewayError>;
}
