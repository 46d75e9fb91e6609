//! Settlement Core - service entry point
//!
//! Wires config -> logging -> database -> background workers -> gateway:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌───────────────┐    ┌──────────┐
//! │  Config  │───▶│ Postgres │───▶│ Engine+Workers│───▶│ Gateway  │
//! │ (yaml/env)│   │  (pool)  │    │ (outbox,expiry)│   │  (axum)  │
//! └──────────┘    └──────────┘    └───────────────┘    └──────────┘
//! ```

use std::sync::Arc;

use settlement_core::config::AppConfig;
use settlement_core::db::Database;
use settlement_core::expiry::ExpiryWorker;
use settlement_core::gateway::{self, AppState};
use settlement_core::logging::init_logging;
use settlement_core::outbox::OutboxDrainer;
use settlement_core::outbox::deliver::{Deliver, RealtimeBroadcaster, WebhookSink};
use settlement_core::settlement::SettlementEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        version = env!("GIT_HASH"),
        mock_mode = config.mock_mode,
        "settlement core starting"
    );

    let db = Arc::new(Database::connect(&config).await?);
    let engine = Arc::new(SettlementEngine::new(db.pool().clone(), config.mock_mode));

    // Outbox drainer: realtime broadcast always, webhook when configured.
    let mut sinks: Vec<Arc<dyn Deliver>> = vec![Arc::new(RealtimeBroadcaster::new(1024))];
    if let Some(url) = config.webhook_url.clone() {
        sinks.push(Arc::new(WebhookSink::new(
            url,
            config.core_api_secret.clone(),
        )));
    }
    let drainer = OutboxDrainer::new(db.pool().clone(), sinks)
        .with_batch_size(config.outbox_batch_size)
        .with_poll_interval(std::time::Duration::from_millis(
            config.outbox_poll_interval_ms,
        ));
    tokio::spawn(drainer.run());

    let expiry = ExpiryWorker::new(db.pool().clone(), engine.clone()).with_poll_interval(
        std::time::Duration::from_secs(config.expiry_poll_interval_secs),
    );
    tokio::spawn(expiry.run());

    let state = Arc::new(AppState {
        engine,
        db,
        api_secret: config.core_api_secret.clone(),
    });
    let app = gateway::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(bind_addr = %config.bind_addr, "gateway listening");
    axum::serve(listener, app).await?;

    Ok(())
}
