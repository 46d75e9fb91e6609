//! Order Event Log
//!
//! Append-only history of status transitions. One row per persisted
//! transition, written inside the same transaction as the order mutation.
//! No updates, no deletes; readers reconstruct the full audit trail.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::order::status::{ActorType, OrderStatus};
use crate::order::store::{StoreError, parse_col};

/// New event row; `event_type` is derived from the target status.
#[derive(Debug, Clone)]
pub struct NewOrderEvent {
    pub order_id: Uuid,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub metadata: Value,
}

/// Persisted event row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: Uuid,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

pub struct EventLog;

impl EventLog {
    /// Append a transition event inside the caller's transaction.
    pub async fn append(tx: &mut PgConnection, event: &NewOrderEvent) -> Result<i64, sqlx::Error> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO order_events
                (order_id, event_type, actor_type, actor_id,
                 old_status, new_status, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id
            "#,
        )
        .bind(event.order_id)
        .bind(&event.event_type)
        .bind(event.actor_type.as_str())
        .bind(&event.actor_id)
        .bind(event.old_status.as_str())
        .bind(event.new_status.as_str())
        .bind(&event.metadata)
        .fetch_one(&mut *tx)
        .await?;

        Ok(id)
    }

    /// Full history for an order, oldest first.
    pub async fn list_for_order(
        pool: &PgPool,
        order_id: Uuid,
    ) -> Result<Vec<OrderEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, event_type, actor_type, actor_id,
                   old_status, new_status, metadata, created_at
            FROM order_events
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    /// Count of events of a given type for an order. Used by the
    /// post-commit invariant verifier.
    pub async fn count_of_type(
        pool: &PgPool,
        order_id: Uuid,
        event_type: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM order_events WHERE order_id = $1 AND event_type = $2",
        )
        .bind(order_id)
        .bind(event_type)
        .fetch_one(pool)
        .await
    }
}

fn row_to_event(row: &PgRow) -> Result<OrderEvent, StoreError> {
    let actor_type: String = row.get("actor_type");
    let old_status: String = row.get("old_status");
    let new_status: String = row.get("new_status");

    Ok(OrderEvent {
        id: row.get("id"),
        order_id: row.get("order_id"),
        event_type: row.get("event_type"),
        actor_type: parse_col::<ActorType>(actor_type, "actor_type")?,
        actor_id: row.get("actor_id"),
        old_status: parse_col::<OrderStatus>(old_status, "old_status")?,
        new_status: parse_col::<OrderStatus>(new_status, "new_status")?,
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_derivation_matches_status() {
        let event = NewOrderEvent {
            order_id: Uuid::new_v4(),
            event_type: OrderStatus::Completed.event_type(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            old_status: OrderStatus::PaymentSent,
            new_status: OrderStatus::Completed,
            metadata: serde_json::json!({}),
        };
        assert_eq!(event.event_type, "status_changed_to_completed");
    }
}
