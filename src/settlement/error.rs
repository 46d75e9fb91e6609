//! Settlement Errors
//!
//! Three classes surface from the engine: business denials (no side
//! effects), optimistic conflicts (no side effects, caller may retry with
//! fresh state), and fatal failures (database or post-commit invariant).
//! `code()` yields the stable wire-level string for each.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::order::status::{OrderStatus, TransitionDenied};
use crate::order::store::StoreError;

use super::verifier::FinalizationInvariantError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("order is {current}, {operation} is not possible")]
    StatusInvalid {
        current: OrderStatus,
        operation: &'static str,
    },

    #[error("order status changed concurrently: expected {expected}, found {actual}")]
    StatusChanged {
        expected: OrderStatus,
        actual: OrderStatus,
    },

    #[error("escrow is already locked for this order")]
    AlreadyEscrowed,

    #[error("escrow was already released for this order")]
    AlreadyReleased,

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("{0}")]
    Denied(#[from] TransitionDenied),

    #[error("order version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i32, actual: i32 },

    #[error("escrow is locked but no release transaction exists; release must be used")]
    CannotCompleteWithoutRelease,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Invariant(#[from] FinalizationInvariantError),

    #[error("operation exceeded its transaction budget")]
    Timeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Stable wire-level error code.
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            SettlementError::StatusInvalid { .. } => "STATUS_INVALID",
            SettlementError::StatusChanged { .. } => "STATUS_CHANGED",
            SettlementError::AlreadyEscrowed => "ALREADY_ESCROWED",
            SettlementError::AlreadyReleased => "ALREADY_RELEASED",
            SettlementError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettlementError::Denied(_) => "DENIED",
            SettlementError::VersionConflict { .. } => "VERSION_CONFLICT",
            SettlementError::CannotCompleteWithoutRelease => "STATUS_INVALID",
            SettlementError::Validation(_) => "VALIDATION",
            SettlementError::Invariant(e) => e.code,
            SettlementError::Timeout => "TIMEOUT",
            SettlementError::Database(_) | SettlementError::Internal(_) => "DATABASE_ERROR",
        }
    }

    /// Conflicts may be retried by the caller with refreshed state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SettlementError::StatusChanged { .. }
                | SettlementError::VersionConflict { .. }
                | SettlementError::AlreadyEscrowed
                | SettlementError::AlreadyReleased
        )
    }
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => SettlementError::OrderNotFound(id),
            StoreError::VersionConflict { expected, actual } => {
                SettlementError::VersionConflict { expected, actual }
            }
            StoreError::AlreadyEscrowed => SettlementError::AlreadyEscrowed,
            StoreError::AlreadyReleased => SettlementError::AlreadyReleased,
            StoreError::Database(e) => SettlementError::Database(e),
            StoreError::Corrupt { field, value } => {
                SettlementError::Internal(format!("corrupt order row: {field}={value}"))
            }
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientBalance {
                needed, available, ..
            } => SettlementError::InsufficientBalance { needed, available },
            LedgerError::AccountNotFound(entity) => {
                SettlementError::Validation(format!("no balance account for {entity}"))
            }
            LedgerError::InvalidAmount(amount) => {
                SettlementError::Validation(format!("invalid amount: {amount}"))
            }
            LedgerError::Database(e) => SettlementError::Database(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_are_stable() {
        assert_eq!(
            SettlementError::OrderNotFound(Uuid::nil()).code(),
            "ORDER_NOT_FOUND"
        );
        assert_eq!(
            SettlementError::StatusInvalid {
                current: OrderStatus::Completed,
                operation: "release",
            }
            .code(),
            "STATUS_INVALID"
        );
        assert_eq!(
            SettlementError::StatusChanged {
                expected: OrderStatus::Escrowed,
                actual: OrderStatus::Cancelled,
            }
            .code(),
            "STATUS_CHANGED"
        );
        assert_eq!(SettlementError::AlreadyEscrowed.code(), "ALREADY_ESCROWED");
        assert_eq!(SettlementError::AlreadyReleased.code(), "ALREADY_RELEASED");
        assert_eq!(
            SettlementError::InsufficientBalance {
                needed: Decimal::new(100, 0),
                available: Decimal::new(1, 0),
            }
            .code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(
            SettlementError::Denied(TransitionDenied::Terminal(OrderStatus::Completed)).code(),
            "DENIED"
        );
        assert_eq!(
            SettlementError::VersionConflict {
                expected: 2,
                actual: 3,
            }
            .code(),
            "VERSION_CONFLICT"
        );
        assert_eq!(SettlementError::Timeout.code(), "TIMEOUT");
        assert_eq!(
            SettlementError::Validation("bad".into()).code(),
            "VALIDATION"
        );
    }

    #[test]
    fn test_conflict_classification() {
        assert!(SettlementError::AlreadyReleased.is_conflict());
        assert!(
            SettlementError::VersionConflict {
                expected: 1,
                actual: 2,
            }
            .is_conflict()
        );
        assert!(!SettlementError::Timeout.is_conflict());
        assert!(!SettlementError::OrderNotFound(Uuid::nil()).is_conflict());
    }
}
