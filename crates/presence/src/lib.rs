//! Presence registry: the authoritative `(user, device) → node` map.
//!
//! The registry is the single source of truth for routing. Nodes never cache
//! remote presence; the fan-out publisher asks for a fresh node grouping on
//! every send. Records are last-writer-wins per `(user, device)` and are
//! retained on `offline` so a known-but-offline device stays distinguishable
//! from an unknown one.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use parley_protocol::DeviceRef;

pub mod client;
mod error;
pub mod routes;
pub mod server;
pub mod store_memory;
pub mod store_redis;

pub use {
    client::HttpPresence,
    error::{Error, Result},
    store_memory::InMemoryPresence,
    store_redis::RedisPresence,
};

// ── Types ────────────────────────────────────────────────────────────────────

/// Device liveness as stored in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Offline,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// One `(user, device)` registry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub node_id: String,
    pub status: Status,
    pub last_online: DateTime<Utc>,
}

/// Grouped lookup result: `node_id → online devices routed to that node`.
pub type NodeMap = HashMap<String, Vec<DeviceRef>>;

// ── Registry trait ───────────────────────────────────────────────────────────

/// The presence registry contract shared by the backing stores and the HTTP
/// client the chat nodes use.
#[async_trait]
pub trait Presence: Send + Sync {
    /// Upsert `(user, device)` as online on `node_id` and register the device
    /// in the user's device set.
    async fn mark_online(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()>;

    /// Upsert `(user, device)` as offline. The record is retained.
    async fn mark_offline(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()>;

    /// Refresh liveness; equivalent to [`Presence::mark_online`].
    async fn heartbeat(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.mark_online(user_id, device_id, node_id).await
    }

    /// All device records for a user, online or not. Empty when the user has
    /// never registered a device.
    async fn get_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>>;

    /// Group the online devices of `user_ids` by node, omitting the single
    /// `(sender_id, origin_device_id)` entry when both are given. This is the
    /// fan-out hot path: one call regardless of fan-out degree.
    async fn node_map(
        &self,
        user_ids: &[String],
        sender_id: Option<&str>,
        origin_device_id: Option<&str>,
    ) -> Result<NodeMap>;
}

pub(crate) fn excluded(
    user_id: &str,
    device_id: &str,
    sender_id: Option<&str>,
    origin_device_id: Option<&str>,
) -> bool {
    sender_id == Some(user_id) && origin_device_id == Some(device_id)
}
