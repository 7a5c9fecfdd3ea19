use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Caller, TransactionStatus};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetStatusRequest {
    pub status: String,
    pub notes: String,
}

pub async fn set_transaction_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(transaction_id): Path<Uuid>,
    Json(payload): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    let status: TransactionStatus = payload.status.parse()?;
    let view = state
        .orchestrator
        .admin_override(&caller, transaction_id, status, &payload.notes)
        .await?;

    Ok(Json(view))
}
