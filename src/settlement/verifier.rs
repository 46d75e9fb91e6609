//! Post-Commit Invariant Verifier
//!
//! Re-reads the order and its related rows immediately after a release or
//! refund commit and asserts the finalization landed in a consistent shape.
//! Detection only: the transaction is already committed, so a failure here
//! raises an alert and surfaces the invariant code to the caller, but never
//! writes.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::events::EventLog;
use crate::order::OrderStore;
use crate::order::status::OrderStatus;
use crate::outbox::Outbox;

/// A committed finalization failed its post-commit assertions.
#[derive(Debug, Error)]
#[error("{code} for order {order_id}: {details}")]
pub struct FinalizationInvariantError {
    pub code: &'static str,
    pub order_id: Uuid,
    pub details: String,
}

pub const RELEASE_INVARIANT_CODE: &str = "ORDER_RELEASE_INVARIANT_FAILED";
pub const REFUND_INVARIANT_CODE: &str = "ORDER_REFUND_INVARIANT_FAILED";

fn release_failure(order_id: Uuid, details: String) -> FinalizationInvariantError {
    tracing::error!(%order_id, %details, "release invariant violated after commit");
    FinalizationInvariantError {
        code: RELEASE_INVARIANT_CODE,
        order_id,
        details,
    }
}

fn refund_failure(order_id: Uuid, details: String) -> FinalizationInvariantError {
    tracing::error!(%order_id, %details, "refund invariant violated after commit");
    FinalizationInvariantError {
        code: REFUND_INVARIANT_CODE,
        order_id,
        details,
    }
}

/// Assert a committed release left the order completed, with the expected
/// release hash and a version at or past the post-image's.
pub async fn verify_release(
    pool: &PgPool,
    order_id: Uuid,
    expected_tx_hash: &str,
    expected_min_version: i32,
) -> Result<(), FinalizationInvariantError> {
    let order = OrderStore::load(pool, order_id)
        .await
        .map_err(|e| release_failure(order_id, format!("re-read failed: {e}")))?
        .ok_or_else(|| release_failure(order_id, "order vanished after commit".to_string()))?;

    if order.status != OrderStatus::Completed {
        return Err(release_failure(
            order_id,
            format!("status is {}, expected completed", order.status),
        ));
    }
    match order.release_tx_hash.as_deref() {
        Some(hash) if hash == expected_tx_hash => {}
        other => {
            return Err(release_failure(
                order_id,
                format!("release_tx_hash is {other:?}, expected {expected_tx_hash:?}"),
            ));
        }
    }
    if order.order_version < expected_min_version {
        return Err(release_failure(
            order_id,
            format!(
                "order_version {} below expected minimum {expected_min_version}",
                order.order_version
            ),
        ));
    }

    Ok(())
}

/// Assert a committed refund (or escrow-refunding expiry) left the order in
/// its terminal status with the matching event and outbox rows present.
pub async fn verify_refund(
    pool: &PgPool,
    order_id: Uuid,
    final_status: OrderStatus,
    expected_min_version: i32,
) -> Result<(), FinalizationInvariantError> {
    let order = OrderStore::load(pool, order_id)
        .await
        .map_err(|e| refund_failure(order_id, format!("re-read failed: {e}")))?
        .ok_or_else(|| refund_failure(order_id, "order vanished after commit".to_string()))?;

    if order.status != final_status {
        return Err(refund_failure(
            order_id,
            format!("status is {}, expected {final_status}", order.status),
        ));
    }
    if order.order_version < expected_min_version {
        return Err(refund_failure(
            order_id,
            format!(
                "order_version {} below expected minimum {expected_min_version}",
                order.order_version
            ),
        ));
    }

    let event_type = final_status.event_type();
    let events = EventLog::count_of_type(pool, order_id, &event_type)
        .await
        .map_err(|e| refund_failure(order_id, format!("event re-read failed: {e}")))?;
    if events < 1 {
        return Err(refund_failure(
            order_id,
            format!("no {event_type} event recorded"),
        ));
    }

    let outbox_type = final_status.outbox_event_type();
    let outbox_rows = Outbox::count_of_type(pool, order_id, &outbox_type)
        .await
        .map_err(|e| refund_failure(order_id, format!("outbox re-read failed: {e}")))?;
    if outbox_rows < 1 {
        return Err(refund_failure(
            order_id,
            format!("no {outbox_type} outbox row recorded"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_codes() {
        let release = release_failure(Uuid::nil(), "detail".into());
        assert_eq!(release.code, "ORDER_RELEASE_INVARIANT_FAILED");
        let refund = refund_failure(Uuid::nil(), "detail".into());
        assert_eq!(refund.code, "ORDER_REFUND_INVARIANT_FAILED");
        assert!(release.to_string().contains("ORDER_RELEASE_INVARIANT_FAILED"));
    }
}
