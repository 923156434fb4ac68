//! In-memory registry for tests and single-node development.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::Utc,
};

use parley_protocol::DeviceRef;

use crate::{DeviceRecord, NodeMap, Presence, Result, Status, excluded};

/// Registry backed by a `HashMap`. Nothing persists; for tests and dev only.
#[derive(Default)]
pub struct InMemoryPresence {
    users: Mutex<HashMap<String, HashMap<String, DeviceRecord>>>,
}

impl InMemoryPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert(&self, user_id: &str, device_id: &str, node_id: &str, status: Status) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let devices = users.entry(user_id.to_string()).or_default();
        devices.insert(device_id.to_string(), DeviceRecord {
            device_id: device_id.to_string(),
            node_id: node_id.to_string(),
            status,
            last_online: Utc::now(),
        });
    }

    /// Flip `online` records to `offline` when `last_online` is older than
    /// `older_than`. Returns how many records were flipped.
    pub fn sweep_stale(&self, older_than: Duration) -> u64 {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut swept = 0;
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        for devices in users.values_mut() {
            for record in devices.values_mut() {
                if record.status == Status::Online && record.last_online < cutoff {
                    record.status = Status::Offline;
                    swept += 1;
                }
            }
        }
        swept
    }
}

#[async_trait]
impl Presence for InMemoryPresence {
    async fn mark_online(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.upsert(user_id, device_id, node_id, Status::Online);
        Ok(())
    }

    async fn mark_offline(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.upsert(user_id, device_id, node_id, Status::Offline);
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<DeviceRecord> = users
            .get(user_id)
            .map(|devices| devices.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(records)
    }

    async fn node_map(
        &self,
        user_ids: &[String],
        sender_id: Option<&str>,
        origin_device_id: Option<&str>,
    ) -> Result<NodeMap> {
        let users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let mut map = NodeMap::new();
        for user_id in user_ids {
            let Some(devices) = users.get(user_id) else {
                continue;
            };
            for record in devices.values() {
                if record.status != Status::Online {
                    continue;
                }
                if excluded(user_id, &record.device_id, sender_id, origin_device_id) {
                    continue;
                }
                map.entry(record.node_id.clone())
                    .or_default()
                    .push(DeviceRef::new(user_id.clone(), record.device_id.clone()));
            }
        }
        Ok(map)
    }
}
