//! Command and read handlers. Each command maps onto exactly one engine
//! operation; reads compose the store with the status normalizer.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde_json::{Value, json};
use uuid::Uuid;
use validator::Validate;

use crate::events::EventLog;
use crate::ledger::{BalanceBook, EntityKind, EntityRef};
use crate::order::models::EscrowRefs;
use crate::order::status::{OrderStatus, PublicStatus};
use crate::order::store::OrderStore;
use crate::outbox::Outbox;
use crate::settlement::SettlementError;

use super::types::{
    BalanceResponse, CancelRequest, EscrowLockRequest, EventListResponse, ListOrdersQuery,
    OrderListResponse, OrderResponse, OrderSummary, PatchStatusRequest, ReleaseRequest,
    StuckOutboxResponse,
};
use super::{ApiError, AppState, actor_from_headers, require_auth};

fn validated<T: Validate>(request: T) -> Result<T, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(request)
}

/// Parse a public status value. Transient internal names and unknown
/// values both fail shape validation.
fn parse_public_status(s: &str) -> Result<PublicStatus, ApiError> {
    s.parse::<PublicStatus>()
        .map_err(|_| ApiError::BadRequest(format!("invalid public status: {s}")))
}

fn parse_expected(expected: &Option<String>) -> Result<Option<OrderStatus>, ApiError> {
    expected
        .as_deref()
        .map(|s| parse_public_status(s).map(|p| p.canonical()))
        .transpose()
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.db.health_check().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("GIT_HASH"),
    })))
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;

    let order = OrderStore::load(state.engine.pool(), id)
        .await?
        .ok_or(SettlementError::OrderNotFound(id))?;
    Ok(Json(OrderResponse::new(order)))
}

pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<OrderListResponse>, ApiError> {
    require_auth(&state, &headers)?;

    let statuses: Vec<OrderStatus> = match &query.status {
        Some(s) => parse_public_status(s)?.expand().to_vec(),
        None => OrderStatus::ALL.to_vec(),
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let orders = OrderStore::list_by_status(state.engine.pool(), &statuses, limit).await?;
    let orders = orders
        .into_iter()
        .map(|order| {
            let minimal_status = order.status.public();
            OrderSummary {
                order,
                minimal_status,
            }
        })
        .collect();

    Ok(Json(OrderListResponse { ok: true, orders }))
}

pub async fn order_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<EventListResponse>, ApiError> {
    require_auth(&state, &headers)?;

    let events = EventLog::list_for_order(state.engine.pool(), id).await?;
    Ok(Json(EventListResponse { ok: true, events }))
}

pub async fn patch_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<PatchStatusRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let request = validated(request)?;

    let to = parse_public_status(&request.status)?.canonical();
    let metadata = request.metadata.unwrap_or_else(|| json!({}));

    let outcome = state
        .engine
        .patch_status(id, to, &actor, metadata, request.acceptor_wallet_address)
        .await?;
    Ok(Json(OrderResponse::new(outcome.order)))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let request = validated(request)?;
    let expected = parse_expected(&request.expected_status)?;

    let outcome = state.engine.cancel(id, &actor, request.reason, expected).await?;
    Ok(Json(OrderResponse::new(outcome.order)))
}

/// Cancel-with-refund. Same atomic path as cancel; orders without a live
/// escrow fall back to the simple cancellation shape.
pub async fn refund(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    cancel(State(state), headers, Path(id), Json(request)).await
}

pub async fn escrow_lock(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<EscrowLockRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let request = validated(request)?;
    let expected = parse_expected(&request.expected_status)?;

    let refs = EscrowRefs {
        escrow_address: request.escrow_address,
        escrow_trade_id: request.escrow_trade_id,
        escrow_trade_pda: request.escrow_trade_pda,
        escrow_pda: request.escrow_pda,
        escrow_creator_wallet: request.escrow_creator_wallet,
    };

    let outcome = state
        .engine
        .escrow_lock(id, &actor, &request.tx_hash, refs, expected)
        .await?;
    Ok(Json(OrderResponse::new(outcome.order)))
}

pub async fn release(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let request = validated(request)?;
    let expected = parse_expected(&request.expected_status)?;

    let outcome = state
        .engine
        .release(id, &actor, &request.tx_hash, expected)
        .await?;
    Ok(Json(OrderResponse::new(outcome.order)))
}

pub async fn extend_expiry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    require_auth(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;

    let outcome = state.engine.extend_expiry(id, &actor).await?;
    Ok(Json(OrderResponse::new(outcome.order)))
}

pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<BalanceResponse>, ApiError> {
    require_auth(&state, &headers)?;

    let kind = kind
        .parse::<EntityKind>()
        .map_err(|_| ApiError::BadRequest(format!("invalid entity kind: {kind}")))?;
    let entity = EntityRef::new(kind, id.clone());
    let balance = BalanceBook::fetch_balance(state.engine.pool(), &entity).await?;

    Ok(Json(BalanceResponse {
        ok: true,
        kind: kind.as_str().to_string(),
        id,
        balance,
    }))
}

/// Monitoring: undelivered notifications past the alert window.
pub async fn stuck_outbox(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StuckOutboxResponse>, ApiError> {
    require_auth(&state, &headers)?;

    let rows = Outbox::stuck(state.engine.pool()).await?;
    Ok(Json(StuckOutboxResponse { ok: true, rows }))
}
