use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::domain::{Caller, CallerRole};
use crate::error::AppError;

/// Set by the upstream authentication layer.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let payer_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing caller identity".to_string()))?
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::Unauthorized("malformed caller identity".to_string()))?;

        let role = match parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|r| r.trim().to_lowercase())
            .as_deref()
        {
            None | Some("member") => CallerRole::Member,
            Some("admin") => CallerRole::Admin,
            Some(_) => return Err(AppError::Unauthorized("unknown caller role".to_string())),
        };

        Ok(Caller { payer_id, role })
    }
}

pub async fn admin_auth(
    State(admin_api_key): State<Arc<SecretString>>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let presented = match auth_header {
        Some(auth) => auth.strip_prefix("Bearer ").unwrap_or(auth),
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    let expected = admin_api_key.expose_secret().as_bytes();
    if presented.len() == expected.len() && bool::from(presented.as_bytes().ct_eq(expected)) {
        Ok(next.run(req).await)
    } else {
        tracing::warn!(target: "security", "Rejected admin request with invalid API key");
        Err(StatusCode::UNAUTHORIZED)
    }
}
