use thiserror::Error;

use crate::ports::RepositoryError;

/// Failure taxonomy of the payment core.
///
/// Variants are chosen so the caller can tell "retry" from "fix your input" from
/// "contact support". None of them carry secrets or digests.
#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Idempotent conflict: the registration is already paid.
    #[error("Already paid: {0}")]
    AlreadyPaid(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cannot move transaction from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("Storage error: {0}")]
    Store(#[from] RepositoryError),
}

impl PaymentError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::GatewayUnavailable(_) | PaymentError::ProofGenerationFailed(_)
        )
    }
}

impl From<crate::validation::ValidationError> for PaymentError {
    fn from(err: crate::validation::ValidationError) -> Self {
        PaymentError::Validation(err.to_string())
    }
}
