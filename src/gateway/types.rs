//! Gateway request/response shapes
//!
//! Inputs get shape validation here; authorization is the cross-cutting
//! check in `gateway::mod` and business rules live in the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::events::OrderEvent;
use crate::order::models::Order;
use crate::order::status::PublicStatus;
use crate::outbox::OutboxRow;

/// Body for `POST /api/v1/orders/{id}/status`.
#[derive(Debug, Deserialize, Validate)]
pub struct PatchStatusRequest {
    /// Public status value; transient internal statuses are rejected.
    #[validate(length(min = 1, max = 32))]
    pub status: String,
    pub metadata: Option<Value>,
    #[validate(length(min = 1, max = 128))]
    pub acceptor_wallet_address: Option<String>,
}

/// Body for `POST /api/v1/orders/{id}/escrow`.
#[derive(Debug, Deserialize, Validate)]
pub struct EscrowLockRequest {
    #[validate(length(min = 1, max = 128))]
    pub tx_hash: String,
    #[validate(length(min = 1, max = 128))]
    pub escrow_address: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub escrow_trade_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub escrow_trade_pda: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub escrow_pda: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub escrow_creator_wallet: Option<String>,
    /// Optimistic guard: fail with STATUS_CHANGED when the order moved.
    #[validate(length(min = 1, max = 32))]
    pub expected_status: Option<String>,
}

/// Body for `POST /api/v1/orders/{id}/release`.
#[derive(Debug, Deserialize, Validate)]
pub struct ReleaseRequest {
    #[validate(length(min = 1, max = 128))]
    pub tx_hash: String,
    #[validate(length(min = 1, max = 32))]
    pub expected_status: Option<String>,
}

/// Body for `POST /api/v1/orders/{id}/cancel` and `/refund`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub expected_status: Option<String>,
}

/// Query for `GET /api/v1/orders`.
#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    /// Public status filter; expanded to the internal status set.
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Success envelope for single-order commands and reads.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub ok: bool,
    pub order: Order,
    pub minimal_status: PublicStatus,
}

impl OrderResponse {
    pub fn new(order: Order) -> Self {
        let minimal_status = order.status.public();
        Self {
            ok: true,
            order,
            minimal_status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub ok: bool,
    pub orders: Vec<OrderSummary>,
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: Order,
    pub minimal_status: PublicStatus,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub ok: bool,
    pub events: Vec<OrderEvent>,
}

#[derive(Debug, Serialize)]
pub struct StuckOutboxResponse {
    pub ok: bool,
    pub rows: Vec<OutboxRow>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub ok: bool,
    pub kind: String,
    pub id: String,
    pub balance: rust_decimal::Decimal,
}

/// Error envelope: `{error, code, message}` with a stable code string.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_status_request_validation() {
        let ok = PatchStatusRequest {
            status: "payment_sent".into(),
            metadata: None,
            acceptor_wallet_address: None,
        };
        assert!(ok.validate().is_ok());

        let empty = PatchStatusRequest {
            status: "".into(),
            metadata: None,
            acceptor_wallet_address: None,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_cancel_request_reason_cap() {
        let long = CancelRequest {
            reason: Some("x".repeat(501)),
            expected_status: None,
        };
        assert!(long.validate().is_err());

        let ok = CancelRequest {
            reason: Some("change of mind".into()),
            expected_status: None,
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_release_request_tx_hash_required_nonempty() {
        let bad = ReleaseRequest {
            tx_hash: "".into(),
            expected_status: None,
        };
        assert!(bad.validate().is_err());
    }
}
