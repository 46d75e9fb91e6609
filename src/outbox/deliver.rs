//! Delivery Sinks
//!
//! The narrow contract between the outbox drainer and external
//! collaborators: `Deliver(event_type, payload) -> ok | err`. Sinks run
//! strictly after commit; nothing here is ever called inside the writing
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DeliveryError(pub String);

#[async_trait]
pub trait Deliver: Send + Sync {
    /// Sink name for logs and retry errors.
    fn name(&self) -> &'static str;

    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<(), DeliveryError>;
}

/// Event fanned out to in-process realtime consumers (the WebSocket layer
/// subscribes to this channel outside the core).
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event_type: String,
    pub payload: Value,
}

/// Realtime broadcast sink backed by a tokio broadcast channel.
pub struct RealtimeBroadcaster {
    sender: broadcast::Sender<OutboundEvent>,
}

impl RealtimeBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe a consumer (one receiver per connection).
    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Deliver for RealtimeBroadcaster {
    fn name(&self) -> &'static str {
        "realtime"
    }

    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<(), DeliveryError> {
        // No subscribers is not a failure; realtime fan-out is best-effort
        // on top of the at-least-once outbox.
        let _ = self.sender.send(OutboundEvent {
            event_type: event_type.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Webhook sink posting each notification to a configured endpoint.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl WebhookSink {
    pub fn new(url: String, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            secret,
        }
    }
}

#[async_trait]
impl Deliver for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "event_type": event_type,
            "payload": payload,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError(format!("webhook send failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Recording sink for tests: captures deliveries and can be told to fail.
pub struct MockSink {
    name: &'static str,
    pub delivered: std::sync::Mutex<Vec<(String, Value)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockSink {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            delivered: std::sync::Mutex::new(Vec::new()),
            fail: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl Deliver for MockSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn deliver(&self, event_type: &str, payload: &Value) -> Result<(), DeliveryError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DeliveryError("mock sink failure".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((event_type.to_string(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let broadcaster = RealtimeBroadcaster::new(16);
        let result = broadcaster
            .deliver("ORDER_COMPLETED", &serde_json::json!({"orderId": "x"}))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let broadcaster = RealtimeBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();

        broadcaster
            .deliver("ORDER_ESCROWED", &serde_json::json!({"orderId": "y"}))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "ORDER_ESCROWED");
        assert_eq!(event.payload["orderId"], "y");
    }

    #[tokio::test]
    async fn test_mock_sink_records_and_fails() {
        let sink = MockSink::new("mock");
        sink.deliver("ORDER_CANCELLED", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(sink.delivered_count(), 1);

        sink.set_fail(true);
        assert!(sink.deliver("ORDER_CANCELLED", &serde_json::json!({})).await.is_err());
        assert_eq!(sink.delivered_count(), 1);
    }
}
