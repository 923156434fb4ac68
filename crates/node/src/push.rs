//! Push-notification dispatch for recipients with no online device.
//!
//! The distributor emits one typed event per affected user; the push service
//! behind the HTTP sink is opaque to the core.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::json,
    tracing::info,
};

use parley_protocol::ChatMessage;

use crate::{Error, Result};

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Event emitted for a user whose entire device set is offline.
#[derive(Debug, Clone, Serialize)]
pub struct PushEvent {
    pub user_id: String,
    pub payload: ChatMessage,
}

#[async_trait]
pub trait PushSink: Send + Sync {
    async fn notify(&self, event: PushEvent) -> Result<()>;
}

/// POSTs `{user_id, payload}` to an external push service.
pub struct HttpPushSink {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpPushSink {
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DISPATCH_TIMEOUT)
            .build()
            .map_err(Error::Push)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
        })
    }
}

#[async_trait]
impl PushSink for HttpPushSink {
    async fn notify(&self, event: PushEvent) -> Result<()> {
        self.http
            .post(&self.endpoint)
            .json(&json!({ "user_id": event.user_id, "payload": event.payload }))
            .send()
            .await
            .map_err(Error::Push)?
            .error_for_status()
            .map_err(Error::Push)?;
        Ok(())
    }
}

/// Sink used when no push service is configured: the event is only logged.
pub struct LogPushSink;

#[async_trait]
impl PushSink for LogPushSink {
    async fn notify(&self, event: PushEvent) -> Result<()> {
        info!(
            user_id = %event.user_id,
            conversation_id = %event.payload.conversation_id,
            "push: no online device, notification event emitted"
        );
        Ok(())
    }
}
