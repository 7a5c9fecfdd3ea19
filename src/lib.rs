pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod proof;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use secrecy::SecretString;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::TransactionOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub admin_api_key: Arc<SecretString>,
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/transactions/:transaction_id/status",
            put(handlers::admin::set_transaction_status),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.admin_api_key.clone(),
            middleware::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", post(handlers::transactions::create_transaction))
        .route(
            "/transactions/:order_ref/status",
            get(handlers::transactions::check_transaction),
        )
        .route(
            "/receipts/:transaction_id",
            get(handlers::transactions::get_receipt),
        )
        .route("/callback", post(handlers::callback::callback))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
