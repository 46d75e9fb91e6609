//! Expiry Worker
//!
//! Periodic sweep that moves past-deadline non-terminal orders to
//! `expired` through the finalization engine, so escrow refunds and
//! liquidity restoration ride the same transaction shape as any other
//! cancellation. Rows locked by another writer are skipped, never waited
//! on.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{PgPool, Row};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::order::models::Actor;
use crate::order::status::OrderStatus;
use crate::settlement::{SettlementEngine, SettlementError};

/// How many loop ticks between heartbeat logs.
const HEARTBEAT_EVERY: u64 = 10;
/// Pause between orders when a sweep hits a burst of expiries.
const BURST_BACKOFF: Duration = Duration::from_millis(50);

pub struct ExpiryWorker {
    pool: PgPool,
    engine: Arc<SettlementEngine>,
    poll_interval: Duration,
    batch_size: i64,
}

impl ExpiryWorker {
    pub fn new(pool: PgPool, engine: Arc<SettlementEngine>) -> Self {
        Self {
            pool,
            engine,
            poll_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run the sweep loop forever.
    pub async fn run(self) {
        let mut tick = interval(self.poll_interval);
        let mut ticks = 0u64;
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "expiry worker started"
        );

        loop {
            tick.tick().await;
            ticks += 1;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "expiry sweep done"),
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }

            if ticks % HEARTBEAT_EVERY == 0 {
                info!(ticks, "expiry worker heartbeat");
            }
        }
    }

    /// One sweep. Returns how many orders were expired.
    pub async fn sweep_once(&self) -> Result<usize, SettlementError> {
        let candidates = self.due_candidates().await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let burst = candidates.len() > 10;
        let mut expired = 0usize;
        let actor = Actor::system();

        for order_id in candidates {
            match self
                .engine
                .patch_status(
                    order_id,
                    OrderStatus::Expired,
                    &actor,
                    serde_json::json!({ "reason": "expired" }),
                    None,
                )
                .await
            {
                Ok(_) => {
                    expired += 1;
                    debug!(%order_id, "order expired");
                }
                // Another writer finished the order between the scan and
                // the lock; nothing to do.
                Err(SettlementError::Denied(_)) | Err(SettlementError::OrderNotFound(_)) => {}
                Err(e) => {
                    warn!(%order_id, error = %e, "failed to expire order");
                }
            }

            if burst {
                sleep(BURST_BACKOFF).await;
            }
        }

        Ok(expired)
    }

    /// Past-deadline non-terminal orders. `SKIP LOCKED` keeps the worker
    /// from waiting on rows another writer holds.
    async fn due_candidates(&self) -> Result<Vec<Uuid>, SettlementError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM orders
            WHERE expires_at IS NOT NULL
              AND expires_at <= NOW()
              AND status NOT IN ('completed', 'cancelled', 'expired')
            ORDER BY expires_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}
