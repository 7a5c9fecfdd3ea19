use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Form, Json,
};
use serde_json::json;

use crate::domain::PaymentError;
use crate::gateway::GatewayCallback;
use crate::AppState;

fn acknowledge(status: StatusCode, outcome: &str) -> Response {
    (status, Json(json!({ "status": outcome }))).into_response()
}

/// Gateway callback endpoint.
///
/// Answers `200 {"status":"accepted"}` for applied and duplicate callbacks and
/// `4xx {"status":"rejected"}` for callbacks that must not be retried as sent.
/// Storage trouble answers `503` so the gateway delivers again.
pub async fn callback(
    State(state): State<AppState>,
    payload: Result<Form<GatewayCallback>, FormRejection>,
) -> Response {
    let Form(callback) = match payload {
        Ok(form) => form,
        Err(rejection) => {
            tracing::warn!("Malformed gateway callback: {}", rejection);
            return acknowledge(StatusCode::BAD_REQUEST, "rejected");
        }
    };

    match state.orchestrator.handle_callback(&callback).await {
        Ok(_) => acknowledge(StatusCode::OK, "accepted"),
        Err(PaymentError::SignatureInvalid) => acknowledge(StatusCode::UNAUTHORIZED, "rejected"),
        Err(PaymentError::NotFound(_)) => acknowledge(StatusCode::NOT_FOUND, "rejected"),
        Err(PaymentError::Validation(message)) => {
            tracing::warn!(order_ref = %callback.merchant_order_id, "Callback rejected: {}", message);
            acknowledge(StatusCode::BAD_REQUEST, "rejected")
        }
        Err(e) => {
            tracing::error!(order_ref = %callback.merchant_order_id, error = %e, "Callback processing failed");
            acknowledge(StatusCode::SERVICE_UNAVAILABLE, "error")
        }
    }
}
