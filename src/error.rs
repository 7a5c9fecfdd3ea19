use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::PaymentError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Validation(message) => AppError::Validation(message),
            PaymentError::AlreadyPaid(message) => AppError::Conflict(format!("already paid: {}", message)),
            PaymentError::NotFound(message) => AppError::NotFound(message),
            PaymentError::SignatureInvalid => AppError::Unauthorized("invalid signature".to_string()),
            PaymentError::Forbidden(message) => AppError::Forbidden(message),
            e @ PaymentError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
            PaymentError::GatewayRejected(message) => AppError::BadGateway(message),
            PaymentError::GatewayUnavailable(_) => {
                AppError::ServiceUnavailable("payment gateway unavailable, retry later".to_string())
            }
            PaymentError::ProofGenerationFailed(_) => {
                AppError::ServiceUnavailable("proof of payment not yet available".to_string())
            }
            PaymentError::Store(e) => {
                tracing::error!(error = %e, "Storage failure");
                AppError::Internal("storage failure".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
