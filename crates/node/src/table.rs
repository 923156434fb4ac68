//! The per-node socket table: `user_id → device_id → frame sender`.
//!
//! Inserted on accept, deleted on close, read by the consumer for delivery.
//! Delivery works on cloned senders, so a device disconnecting mid-send
//! observes a closed channel instead of a dangling socket.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};

/// Handle for pushing text frames at one connected device's write loop.
pub type FrameSender = mpsc::UnboundedSender<String>;

#[derive(Default)]
pub struct SocketTable {
    inner: RwLock<HashMap<String, HashMap<String, FrameSender>>>,
}

impl SocketTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device's frame sender. A reconnect with the same device id
    /// replaces the previous sender.
    pub async fn insert(&self, user_id: &str, device_id: &str, sender: FrameSender) {
        let mut inner = self.inner.write().await;
        inner
            .entry(user_id.to_string())
            .or_default()
            .insert(device_id.to_string(), sender);
    }

    /// Drop a device entry; the user entry goes with its last device.
    pub async fn remove(&self, user_id: &str, device_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(devices) = inner.get_mut(user_id) {
            devices.remove(device_id);
            if devices.is_empty() {
                inner.remove(user_id);
            }
        }
    }

    /// Snapshot the sender for one device, if attached here.
    pub async fn sender(&self, user_id: &str, device_id: &str) -> Option<FrameSender> {
        let inner = self.inner.read().await;
        inner.get(user_id).and_then(|devices| devices.get(device_id)).cloned()
    }

    /// Number of devices currently attached to this node.
    pub async fn device_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.values().map(HashMap::len).sum()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_lookup_remove() {
        let table = SocketTable::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        table.insert("alice", "devA1", tx).await;
        assert!(table.sender("alice", "devA1").await.is_some());
        assert!(table.sender("alice", "devA2").await.is_none());
        assert!(table.sender("bob", "devB1").await.is_none());
        assert_eq!(table.device_count().await, 1);

        table.remove("alice", "devA1").await;
        assert!(table.sender("alice", "devA1").await.is_none());
        assert_eq!(table.device_count().await, 0);
    }

    #[tokio::test]
    async fn reconnect_replaces_the_sender() {
        let table = SocketTable::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        table.insert("alice", "devA1", old_tx).await;
        table.insert("alice", "devA1", new_tx).await;

        let sender = table.sender("alice", "devA1").await.unwrap();
        sender.send("frame".into()).unwrap();
        assert_eq!(new_rx.recv().await.unwrap(), "frame");
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removing_one_device_keeps_the_others() {
        let table = SocketTable::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        table.insert("alice", "devA1", tx1).await;
        table.insert("alice", "devA2", tx2).await;
        table.remove("alice", "devA1").await;

        assert!(table.sender("alice", "devA2").await.is_some());
    }
}
