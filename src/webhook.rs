//! # Webhook Delivery
//!
//! Event envelopes emitted on execution milestones (`flow.completed`,
//! `flow.failed`, `node.completed`) and the HTTP sender that delivers
//! them. Delivery retries with exponential backoff under caller-supplied
//! limits, and payloads can be signed with a per-webhook HMAC-SHA256
//! secret carried in the `X-Flowrunner-Signature` header.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

/// Kinds of events the runtime emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "flow.completed")]
    FlowCompleted,
    #[serde(rename = "flow.failed")]
    FlowFailed,
    #[serde(rename = "node.completed")]
    NodeCompleted,
}

/// The envelope delivered to webhook endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub flow_id: String,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub data: Value,
}

impl WebhookEvent {
    pub fn new(
        event_type: EventType,
        flow_id: impl Into<String>,
        execution_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            flow_id: flow_id.into(),
            execution_id: execution_id.into(),
            node_id: None,
            data,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// Event sink the runtime notifies. Delivery is best-effort from the
/// runtime's point of view: a failed emit never fails the execution.
#[async_trait]
pub trait WebhookEmitter: Send + Sync {
    async fn emit(&self, event: &WebhookEvent);
}

/// Backoff schedule for HTTP delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given 1-based retry attempt.
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let millis = (self.initial_delay_ms as f64 * factor) as u64;
        Duration::from_millis(millis.min(self.max_delay_ms))
    }
}

/// POSTs events as JSON to a fixed endpoint.
pub struct HttpWebhookEmitter {
    client: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
    retry: RetryConfig,
}

impl HttpWebhookEmitter {
    pub fn new(endpoint: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            secret: None,
            retry,
        }
    }

    /// Sign payloads with HMAC-SHA256 over the JSON body.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    async fn deliver_once(&self, body: &str, signature: Option<&str>) -> Result<(), String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .body(body.to_string());
        if let Some(signature) = signature {
            request = request.header("x-flowrunner-signature", signature);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("endpoint returned {}", response.status()))
        }
    }
}

#[async_trait]
impl WebhookEmitter for HttpWebhookEmitter {
    async fn emit(&self, event: &WebhookEvent) {
        let body = match serde_json::to_string(event) {
            Ok(body) => body,
            Err(error) => {
                warn!(%error, "webhook event failed to serialize");
                return;
            }
        };
        let signature = self
            .secret
            .as_deref()
            .map(|secret| sign_payload(secret, body.as_bytes()));

        let mut attempt = 0u32;
        loop {
            match self.deliver_once(&body, signature.as_deref()).await {
                Ok(()) => {
                    debug!(execution_id = %event.execution_id, "webhook delivered");
                    return;
                }
                Err(error) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    warn!(%error, attempt, "webhook delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    warn!(%error, "webhook delivery gave up");
                    return;
                }
            }
        }
    }
}

/// No-op sink for deployments without webhooks configured.
pub struct NullEmitter;

#[async_trait]
impl WebhookEmitter for NullEmitter {
    async fn emit(&self, _event: &WebhookEvent) {}
}

/// Hex HMAC-SHA256 of a payload under a per-webhook secret.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature produced by [`sign_payload`].
pub fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = WebhookEvent::new(
            EventType::FlowCompleted,
            "flow-1",
            "exec-1",
            json!({"status": "completed"}),
        )
        .with_node("finish");

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], json!("flow.completed"));
        assert_eq!(wire["flow_id"], json!("flow-1"));
        assert_eq!(wire["execution_id"], json!("exec-1"));
        assert_eq!(wire["node_id"], json!("finish"));
    }

    #[test]
    fn test_signature_round_trip() {
        let signature = sign_payload("whsec", b"{\"a\":1}");
        assert!(verify_signature("whsec", b"{\"a\":1}", &signature));
        assert!(!verify_signature("whsec", b"{\"a\":2}", &signature));
        assert!(!verify_signature("other", b"{\"a\":1}", &signature));
        assert!(!verify_signature("whsec", b"{\"a\":1}", "zz-not-hex"));
    }

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 350,
            backoff_factor: 2.0,
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        // Capped by max_delay_ms.
        assert_eq!(retry.delay_for(3), Duration::from_millis(350));
    }
}
