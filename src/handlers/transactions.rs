use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Caller, ItemKind, ItemRef};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTransactionRequest {
    pub item_kind: ItemKind,
    pub item_id: i64,
    pub method_code: String,
}

pub async fn create_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let item = ItemRef::new(payload.item_kind, payload.item_id);
    let view = state
        .orchestrator
        .create(&caller, item, payload.method_code.trim())
        .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn check_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(order_ref): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let view = state.orchestrator.check_status(&caller, &order_ref).await?;
    Ok(Json(view))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    caller: Caller,
    Path(transaction_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state
        .orchestrator
        .get_payment_detail(&caller, transaction_id)
        .await?;
    Ok(Json(receipt))
}
