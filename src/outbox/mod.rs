//! Transactional Notification Outbox
//!
//! Rows are enqueued in the same transaction as the state change they
//! announce; the background drainer delivers them to external collaborators
//! after commit. At-least-once: consumers must dedupe.

pub mod deliver;
pub mod drainer;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::order::Order;
use crate::order::status::OrderStatus;

pub use deliver::{Deliver, DeliveryError};
pub use drainer::OutboxDrainer;

/// Default per-row delivery attempt cap.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Exponential backoff base and cap.
const BACKOFF_BASE_SECS: u64 = 10;
const BACKOFF_CAP_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Delivered => "delivered",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = crate::order::status::UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "delivered" => Ok(OutboxStatus::Delivered),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(crate::order::status::UnknownStatus(other.to_string())),
        }
    }
}

/// JSON snapshot shipped with every notification. Field names are part of
/// the wire contract with downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(rename = "orderId")]
    pub order_id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "merchantId")]
    pub merchant_id: String,
    pub status: OrderStatus,
    pub minimal_status: crate::order::status::PublicStatus,
    pub order_version: i32,
    #[serde(rename = "previousStatus")]
    pub previous_status: OrderStatus,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl NotificationPayload {
    /// Snapshot an order post-image for the wire.
    pub fn from_order(order: &Order, previous: OrderStatus, tx_hash: Option<String>) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id.clone(),
            merchant_id: order.merchant_id.clone(),
            status: order.status,
            minimal_status: order.status.public(),
            order_version: order.order_version,
            previous_status: previous,
            updated_at: Utc::now(),
            tx_hash,
        }
    }
}

/// Persisted outbox row.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxRow {
    pub id: i64,
    pub order_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

pub struct Outbox;

impl Outbox {
    /// Enqueue a notification inside the caller's transaction. The row
    /// becomes deliverable the moment that transaction commits.
    pub async fn enqueue(
        tx: &mut PgConnection,
        order_id: Uuid,
        event_type: &str,
        payload: &NotificationPayload,
    ) -> Result<OutboxRow, sqlx::Error> {
        let payload = serde_json::to_value(payload).expect("payload serialization is infallible");
        let row = sqlx::query(
            r#"
            INSERT INTO notification_outbox
                (order_id, event_type, payload, status, attempts, max_attempts,
                 next_attempt_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4, NOW(), NOW())
            RETURNING id, order_id, event_type, payload, status, attempts,
                      max_attempts, last_error, next_attempt_at, created_at,
                      delivered_at
            "#,
        )
        .bind(order_id)
        .bind(event_type)
        .bind(&payload)
        .bind(DEFAULT_MAX_ATTEMPTS)
        .fetch_one(&mut *tx)
        .await?;

        Ok(row_to_outbox(&row))
    }

    /// Claim up to `limit` due pending rows, oldest first.
    pub async fn claim_due(pool: &PgPool, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, event_type, payload, status, attempts,
                   max_attempts, last_error, next_attempt_at, created_at, delivered_at
            FROM notification_outbox
            WHERE status = 'pending'
              AND next_attempt_at <= NOW()
              AND attempts < max_attempts
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(row_to_outbox).collect())
    }

    /// Mark a row delivered.
    pub async fn mark_delivered(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE notification_outbox \
             SET status = 'delivered', delivered_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt: bump the counter, store the error, schedule
    /// the retry. The row flips to `failed` once the attempt cap is reached.
    pub async fn mark_attempt_failed(
        pool: &PgPool,
        id: i64,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                next_attempt_at = $3,
                status = CASE WHEN attempts + 1 >= max_attempts
                              THEN 'failed' ELSE 'pending' END
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Monitoring view: undelivered rows older than five minutes, plus
    /// everything that exhausted its attempts.
    pub async fn stuck(pool: &PgPool) -> Result<Vec<OutboxRow>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, event_type, payload, status, attempts,
                   max_attempts, last_error, next_attempt_at, created_at, delivered_at
            FROM notification_outbox
            WHERE (status = 'pending'
                   AND attempts < max_attempts
                   AND created_at < NOW() - INTERVAL '5 minutes')
               OR status = 'failed'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows.iter().map(row_to_outbox).collect())
    }

    /// Rows of a given type for an order. Used by the invariant verifier.
    pub async fn count_of_type(
        pool: &PgPool,
        order_id: Uuid,
        event_type: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notification_outbox \
             WHERE order_id = $1 AND event_type = $2",
        )
        .bind(order_id)
        .bind(event_type)
        .fetch_one(pool)
        .await
    }
}

/// Exponential delivery backoff: 10s, 20s, 40s, ... capped at five minutes.
/// `attempts` is the number of failures so far, starting at 1.
pub fn backoff(attempts: i32) -> Duration {
    let shift = attempts.saturating_sub(1).clamp(0, 10) as u32;
    let secs = BACKOFF_BASE_SECS.saturating_mul(1 << shift);
    Duration::from_secs(secs.min(BACKOFF_CAP_SECS))
}

fn row_to_outbox(row: &PgRow) -> OutboxRow {
    let status: String = row.get("status");
    OutboxRow {
        id: row.get("id"),
        order_id: row.get("order_id"),
        event_type: row.get("event_type"),
        payload: row.get("payload"),
        status: status.parse().unwrap_or(OutboxStatus::Pending),
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        next_attempt_at: row.get("next_attempt_at"),
        created_at: row.get("created_at"),
        delivered_at: row.get("delivered_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(10));
        assert_eq!(backoff(2), Duration::from_secs(20));
        assert_eq!(backoff(3), Duration::from_secs(40));
        assert_eq!(backoff(4), Duration::from_secs(80));
        assert_eq!(backoff(5), Duration::from_secs(160));
        assert_eq!(backoff(6), Duration::from_secs(300));
        assert_eq!(backoff(50), Duration::from_secs(300));
        // Zero/negative attempts behave like the first failure.
        assert_eq!(backoff(0), Duration::from_secs(10));
        assert_eq!(backoff(-3), Duration::from_secs(10));
    }

    #[test]
    fn test_payload_wire_field_names() {
        let payload = NotificationPayload {
            order_id: Uuid::nil(),
            user_id: "u-1".into(),
            merchant_id: "m-1".into(),
            status: OrderStatus::Completed,
            minimal_status: OrderStatus::Completed.public(),
            order_version: 4,
            previous_status: OrderStatus::PaymentSent,
            updated_at: Utc::now(),
            tx_hash: Some("rel-1".into()),
        };
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["orderId"], serde_json::json!(Uuid::nil()));
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["merchantId"], "m-1");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["minimal_status"], "completed");
        assert_eq!(json["order_version"], 4);
        assert_eq!(json["previousStatus"], "payment_sent");
        assert_eq!(json["tx_hash"], "rel-1");
        assert!(json.get("updatedAt").is_some());
    }

    #[test]
    fn test_payload_omits_absent_tx_hash() {
        let payload = NotificationPayload {
            order_id: Uuid::nil(),
            user_id: "u".into(),
            merchant_id: "m".into(),
            status: OrderStatus::Accepted,
            minimal_status: OrderStatus::Accepted.public(),
            order_version: 2,
            previous_status: OrderStatus::Pending,
            updated_at: Utc::now(),
            tx_hash: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("tx_hash").is_none());
    }

    #[test]
    fn test_outbox_status_roundtrip() {
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Delivered,
            OutboxStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<OutboxStatus>().unwrap(), s);
        }
    }
}
