//! Outbox Drainer
//!
//! Background loop that claims due pending rows and pushes them through the
//! configured delivery sinks. Retries with exponential backoff and a small
//! jitter; rows that exhaust their attempts flip to `failed` and stay
//! visible through the stuck-outbox query.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use super::deliver::Deliver;
use super::{Outbox, OutboxRow, backoff};

/// How many loop ticks between heartbeat logs.
const HEARTBEAT_EVERY: u64 = 20;

pub struct OutboxDrainer {
    pool: PgPool,
    sinks: Vec<Arc<dyn Deliver>>,
    batch_size: i64,
    poll_interval: Duration,
    delivery_timeout: Duration,
}

impl OutboxDrainer {
    pub fn new(pool: PgPool, sinks: Vec<Arc<dyn Deliver>>) -> Self {
        Self {
            pool,
            sinks,
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            delivery_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Run the drain loop forever.
    pub async fn run(self) {
        let mut tick = interval(self.poll_interval);
        let mut ticks = 0u64;
        info!(
            sinks = self.sinks.len(),
            batch_size = self.batch_size,
            "outbox drainer started"
        );

        loop {
            tick.tick().await;
            ticks += 1;

            match self.drain_once().await {
                Ok(0) => {}
                Ok(n) => debug!(delivered_or_retried = n, "outbox batch drained"),
                Err(e) => error!(error = %e, "outbox drain pass failed"),
            }

            if ticks % HEARTBEAT_EVERY == 0 {
                info!(ticks, "outbox drainer heartbeat");
            }
        }
    }

    /// One drain pass. Returns the number of rows processed.
    pub async fn drain_once(&self) -> Result<usize, sqlx::Error> {
        let rows = Outbox::claim_due(&self.pool, self.batch_size).await?;
        let count = rows.len();

        for row in rows {
            self.process_row(row).await?;
        }

        Ok(count)
    }

    async fn process_row(&self, row: OutboxRow) -> Result<(), sqlx::Error> {
        match self.deliver_row(&row).await {
            Ok(()) => {
                Outbox::mark_delivered(&self.pool, row.id).await?;
                debug!(
                    outbox_id = row.id,
                    order_id = %row.order_id,
                    event_type = %row.event_type,
                    "notification delivered"
                );
            }
            Err(reason) => {
                let failed_attempts = row.attempts + 1;
                let delay = with_jitter(backoff(failed_attempts));
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(10));

                Outbox::mark_attempt_failed(&self.pool, row.id, &reason, next_attempt_at).await?;

                if failed_attempts >= row.max_attempts {
                    error!(
                        outbox_id = row.id,
                        order_id = %row.order_id,
                        event_type = %row.event_type,
                        attempts = failed_attempts,
                        error = %reason,
                        "notification exhausted attempts, marked failed"
                    );
                } else {
                    warn!(
                        outbox_id = row.id,
                        order_id = %row.order_id,
                        attempts = failed_attempts,
                        retry_in_secs = delay.as_secs(),
                        error = %reason,
                        "notification delivery failed, will retry"
                    );
                }
            }
        }
        Ok(())
    }

    /// Deliver one row to every sink. All sinks must accept; the first
    /// failure (or timeout) aborts the attempt.
    async fn deliver_row(&self, row: &OutboxRow) -> Result<(), String> {
        for sink in &self.sinks {
            match timeout(
                self.delivery_timeout,
                sink.deliver(&row.event_type, &row.payload),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(format!("{}: {}", sink.name(), e)),
                Err(_) => {
                    return Err(format!(
                        "{}: delivery timed out after {:?}",
                        sink.name(),
                        self.delivery_timeout
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Add up to 10% random jitter so retries from concurrent workers spread out.
fn with_jitter(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 10);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(100);
        for _ in 0..100 {
            let jittered = with_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_secs(10));
        }
    }
}
