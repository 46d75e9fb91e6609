//! Public API Surface
//!
//! Thin command handlers mapping transport requests onto the finalization
//! engine, plus read endpoints over the store and normalizer. Internal
//! callers authenticate with the configured bearer secret and identify the
//! acting party through `x-actor-type` / `x-actor-id`.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use crate::db::Database;
use crate::order::models::Actor;
use crate::order::status::ActorType;
use crate::settlement::{SettlementEngine, SettlementError};

use types::ErrorResponse;

pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub db: Arc<Database>,
    /// Bearer expected from internal callers; `None` disables the check.
    pub api_secret: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/v1/orders", get(handlers::list_orders))
        .route("/api/v1/orders/{id}", get(handlers::get_order))
        .route("/api/v1/orders/{id}/events", get(handlers::order_events))
        .route("/api/v1/orders/{id}/status", post(handlers::patch_status))
        .route("/api/v1/orders/{id}/cancel", post(handlers::cancel))
        .route("/api/v1/orders/{id}/escrow", post(handlers::escrow_lock))
        .route("/api/v1/orders/{id}/release", post(handlers::release))
        .route("/api/v1/orders/{id}/refund", post(handlers::refund))
        .route("/api/v1/orders/{id}/extend", post(handlers::extend_expiry))
        .route("/api/v1/balances/{kind}/{id}", get(handlers::get_balance))
        .route("/internal/outbox/stuck", get(handlers::stuck_outbox))
        .with_state(state)
}

/// Gateway-level error: unauthorized, malformed input, or an engine error
/// carried through with its stable code.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    BadRequest(String),
    Settlement(SettlementError),
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError::Settlement(e)
    }
}

impl From<crate::order::store::StoreError> for ApiError {
    fn from(e: crate::order::store::StoreError) -> Self {
        ApiError::Settlement(e.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Settlement(e.into())
    }
}

impl From<crate::ledger::LedgerError> for ApiError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        ApiError::Settlement(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "DENIED",
                "missing or invalid bearer token".to_string(),
            ),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "VALIDATION", message.clone())
            }
            ApiError::Settlement(e) => (http_status(e), e.code(), e.to_string()),
        };

        let body = axum::Json(ErrorResponse {
            error: true,
            code,
            message,
        });
        (status, body).into_response()
    }
}

fn http_status(e: &SettlementError) -> StatusCode {
    match e.code() {
        "ORDER_NOT_FOUND" => StatusCode::NOT_FOUND,
        "DENIED" => StatusCode::FORBIDDEN,
        "VALIDATION" | "INSUFFICIENT_BALANCE" => StatusCode::BAD_REQUEST,
        "STATUS_INVALID" | "STATUS_CHANGED" | "ALREADY_ESCROWED" | "ALREADY_RELEASED"
        | "VERSION_CONFLICT" => StatusCode::CONFLICT,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Check the internal bearer when a secret is configured.
pub fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = &state.api_secret else {
        return Ok(());
    };

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret);

    if authorized {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// Resolve the acting party from `x-actor-type` / `x-actor-id`.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let kind = headers
        .get("x-actor-type")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing x-actor-type header".to_string()))?
        .parse::<ActorType>()
        .map_err(|e| ApiError::BadRequest(format!("invalid x-actor-type: {e}")))?;

    let id = match headers.get("x-actor-id").and_then(|v| v.to_str().ok()) {
        Some(id) if !id.is_empty() => id.to_string(),
        // Automation does not carry a per-request identity.
        None if kind == ActorType::System => "system".to_string(),
        _ => {
            return Err(ApiError::BadRequest(
                "missing x-actor-id header".to_string(),
            ));
        }
    };

    Ok(Actor::new(kind, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_actor_from_headers() {
        let actor =
            actor_from_headers(&headers(&[("x-actor-type", "merchant"), ("x-actor-id", "m-1")]))
                .unwrap();
        assert_eq!(actor, Actor::merchant("m-1"));

        // System defaults its id.
        let actor = actor_from_headers(&headers(&[("x-actor-type", "system")])).unwrap();
        assert_eq!(actor, Actor::system());

        assert!(actor_from_headers(&headers(&[("x-actor-type", "merchant")])).is_err());
        assert!(actor_from_headers(&headers(&[("x-actor-type", "robot")])).is_err());
        assert!(actor_from_headers(&headers(&[])).is_err());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            http_status(&SettlementError::OrderNotFound(uuid::Uuid::nil())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            http_status(&SettlementError::AlreadyReleased),
            StatusCode::CONFLICT
        );
        assert_eq!(
            http_status(&SettlementError::Timeout),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            http_status(&SettlementError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
