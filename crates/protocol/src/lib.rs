//! Wire-level types shared by every parley service.
//!
//! All communication uses JSON: text frames on the client WebSocket, message
//! bodies on the broker queues, and payload strings in the hot window. The
//! shapes here are the contract between the socket endpoint, the fan-out
//! publisher, the per-node consumer, the persistence worker, and the sync
//! reader.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

// ── Broker topology ──────────────────────────────────────────────────────────

/// Direct exchange carrying per-node delivery envelopes.
pub const DELIVERY_EXCHANGE: &str = "chat-direct-exchange";
/// Direct exchange feeding the persistence worker.
pub const PERSISTENCE_EXCHANGE: &str = "persistence-exchange";
/// Durable queue the persistence worker consumes.
pub const PERSISTENCE_QUEUE: &str = "persistence-queue";
/// Routing key binding the persistence queue to its exchange.
pub const PERSISTENCE_ROUTING_KEY: &str = "store";

/// Event type carried by every chat delivery envelope.
pub const CHAT_EVENT: &str = "chat_message";

/// Per-conversation hot window keeps at most this many recent messages.
pub const HOT_WINDOW_LIMIT: usize = 100;

/// Name of the durable per-node delivery queue.
#[must_use]
pub fn node_queue(node_id: &str) -> String {
    format!("{node_id}-queue")
}

/// Hot-window cache key for a conversation.
#[must_use]
pub fn hot_window_key(conversation_id: &str) -> String {
    format!("chat:{conversation_id}:messages")
}

// ── Client error frames ──────────────────────────────────────────────────────

/// Literal text frames sent back on a malformed client send. The socket stays
/// open in both cases.
pub mod frame_errors {
    pub const INVALID_JSON: &str = "Invalid JSON format.";
    pub const MISSING_CONVERSATION_ID: &str = "Missing conversation_id.";
}

// ── Timestamps ───────────────────────────────────────────────────────────────

/// Current UTC time as fractional epoch seconds, the wire representation of
/// `sent_at`. Microsecond precision so the value survives a round trip
/// through the relational store.
#[must_use]
pub fn epoch_now() -> f64 {
    datetime_to_epoch(Utc::now())
}

/// Fractional epoch seconds → timezone-aware UTC. `None` for values outside
/// the representable range.
#[must_use]
pub fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
}

/// Timezone-aware UTC → fractional epoch seconds.
#[must_use]
pub fn datetime_to_epoch(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

// ── Frames and payloads ──────────────────────────────────────────────────────

/// A raw send frame as received on the client socket, before stamping.
///
/// The accepted field set is closed: unknown fields fail deserialization and
/// surface as [`frame_errors::INVALID_JSON`]. `sender_id` is accepted so
/// clients echoing their own id are not rejected, but the value is always
/// overwritten with the authenticated identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFrame {
    pub conversation_id: Option<String>,
    #[serde(rename = "toUser")]
    pub to_user: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub sent_at: Option<f64>,
    pub sender_id: Option<String>,
}

impl SendFrame {
    /// Validate and stamp a frame into an accepted [`ChatMessage`].
    ///
    /// `sender_id` is overwritten with the authenticated user, `type`
    /// defaults to `text`, `sent_at` defaults to `now`, and the originating
    /// device is recorded so fan-out can skip it. The only rejection is a
    /// missing `conversation_id`, reported as the literal error frame text.
    pub fn stamp(
        self,
        sender_id: &str,
        origin_device_id: &str,
        now: f64,
    ) -> Result<ChatMessage, &'static str> {
        let Some(conversation_id) = self.conversation_id else {
            return Err(frame_errors::MISSING_CONVERSATION_ID);
        };
        Ok(ChatMessage {
            conversation_id,
            sender_id: sender_id.to_string(),
            to_user: self.to_user,
            content: self.content,
            kind: self.kind.unwrap_or_else(|| "text".to_string()),
            sent_at: self.sent_at.unwrap_or(now),
            origin_device_id: origin_device_id.to_string(),
        })
    }
}

/// An accepted, stamped chat message. This exact JSON shape travels to the
/// persistence queue, inside delivery envelopes, to recipient sockets, and
/// into the hot window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(rename = "toUser", skip_serializing_if = "Option::is_none")]
    pub to_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub sent_at: f64,
    pub origin_device_id: String,
}

/// One `(user, device)` delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub user_id: String,
    pub device_id: String,
}

impl DeviceRef {
    #[must_use]
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

/// Envelope published on a per-node queue. Specific to one destination node;
/// the payload is identical across the envelopes of a single send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMessage {
    pub event_type: String,
    pub payload: ChatMessage,
    #[serde(default)]
    pub target_devices: Vec<DeviceRef>,
}

impl NodeMessage {
    /// Wrap a chat payload for one node's target devices.
    #[must_use]
    pub fn chat(payload: ChatMessage, target_devices: Vec<DeviceRef>) -> Self {
        Self {
            event_type: CHAT_EVENT.to_string(),
            payload,
            target_devices,
        }
    }
}
