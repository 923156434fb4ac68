//! Redis-backed registry.
//!
//! Layout, per user:
//! - `presence:<user_id>:devices`: set of every device id ever registered.
//! - `presence:<user_id>:<device_id>`: hash with `node_id`, `device_id`,
//!   `status` and `last_online` (RFC 3339).
//!
//! A `presence:users` set indexes users for the staleness sweep.

use std::{collections::HashMap, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    deadpool_redis::{Config, Connection, Pool, Runtime, redis::AsyncCommands},
    tracing::debug,
};

use parley_protocol::DeviceRef;

use crate::{DeviceRecord, Error, NodeMap, Presence, Result, Status, excluded};

const USER_INDEX_KEY: &str = "presence:users";

fn devices_key(user_id: &str) -> String {
    format!("presence:{user_id}:devices")
}

fn device_key(user_id: &str, device_id: &str) -> String {
    format!("presence:{user_id}:{device_id}")
}

pub struct RedisPresence {
    pool: Pool,
}

impl RedisPresence {
    /// Build a registry over a Redis connection pool.
    pub fn connect(url: &str) -> Result<Self> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::backend("creating redis pool", e))?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::backend("acquiring redis connection", e))
    }

    async fn upsert(
        &self,
        user_id: &str,
        device_id: &str,
        node_id: &str,
        status: Status,
    ) -> Result<()> {
        let mut con = self.conn().await?;
        let last_online = Utc::now().to_rfc3339();

        let _: () = con
            .sadd(USER_INDEX_KEY, user_id)
            .await
            .map_err(|e| Error::backend("indexing user", e))?;
        let _: () = con
            .sadd(devices_key(user_id), device_id)
            .await
            .map_err(|e| Error::backend("registering device", e))?;
        let _: () = con
            .hset_multiple(device_key(user_id, device_id), &[
                ("node_id", node_id),
                ("device_id", device_id),
                ("status", status.as_str()),
                ("last_online", last_online.as_str()),
            ])
            .await
            .map_err(|e| Error::backend("writing presence record", e))?;
        Ok(())
    }

    async fn read_record(
        con: &mut Connection,
        user_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceRecord>> {
        let key = device_key(user_id, device_id);
        let data: HashMap<String, String> = con
            .hgetall(&key)
            .await
            .map_err(|e| Error::backend("reading presence record", e))?;
        if data.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_record(&key, &data)?))
    }

    /// Flip `online` records to `offline` when `last_online` is older than
    /// `older_than`. Returns how many records were flipped.
    pub async fn sweep_stale(&self, older_than: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut con = self.conn().await?;
        let users: Vec<String> = con
            .smembers(USER_INDEX_KEY)
            .await
            .map_err(|e| Error::backend("listing users", e))?;

        let mut swept = 0;
        for user_id in users {
            let devices: Vec<String> = con
                .smembers(devices_key(&user_id))
                .await
                .map_err(|e| Error::backend("listing devices", e))?;
            for device_id in devices {
                let Some(record) = Self::read_record(&mut con, &user_id, &device_id).await? else {
                    continue;
                };
                if record.status == Status::Online && record.last_online < cutoff {
                    let _: () = con
                        .hset(device_key(&user_id, &device_id), "status", "offline")
                        .await
                        .map_err(|e| Error::backend("sweeping stale record", e))?;
                    debug!(user_id, device_id, "presence: swept stale online record");
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

fn parse_record(key: &str, data: &HashMap<String, String>) -> Result<DeviceRecord> {
    let field = |name: &str| -> Result<&String> {
        data.get(name)
            .ok_or_else(|| Error::malformed(key, format!("missing field {name}")))
    };
    let status = match field("status")?.as_str() {
        "online" => Status::Online,
        "offline" => Status::Offline,
        other => return Err(Error::malformed(key, format!("bad status {other}"))),
    };
    let last_online = DateTime::parse_from_rfc3339(field("last_online")?)
        .map_err(|e| Error::malformed(key, e.to_string()))?
        .with_timezone(&Utc);
    Ok(DeviceRecord {
        device_id: field("device_id")?.clone(),
        node_id: field("node_id")?.clone(),
        status,
        last_online,
    })
}

#[async_trait]
impl Presence for RedisPresence {
    async fn mark_online(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.upsert(user_id, device_id, node_id, Status::Online).await
    }

    async fn mark_offline(&self, user_id: &str, device_id: &str, node_id: &str) -> Result<()> {
        self.upsert(user_id, device_id, node_id, Status::Offline).await
    }

    async fn get_user(&self, user_id: &str) -> Result<Vec<DeviceRecord>> {
        let mut con = self.conn().await?;
        let devices: Vec<String> = con
            .smembers(devices_key(user_id))
            .await
            .map_err(|e| Error::backend("listing devices", e))?;

        let mut records = Vec::with_capacity(devices.len());
        for device_id in devices {
            if let Some(record) = Self::read_record(&mut con, user_id, &device_id).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(records)
    }

    async fn node_map(
        &self,
        user_ids: &[String],
        sender_id: Option<&str>,
        origin_device_id: Option<&str>,
    ) -> Result<NodeMap> {
        let mut con = self.conn().await?;
        let mut map = NodeMap::new();
        for user_id in user_ids {
            let devices: Vec<String> = con
                .smembers(devices_key(user_id))
                .await
                .map_err(|e| Error::backend("listing devices", e))?;
            for device_id in devices {
                let Some(record) = Self::read_record(&mut con, user_id, &device_id).await? else {
                    continue;
                };
                if record.status != Status::Online {
                    continue;
                }
                if excluded(user_id, &device_id, sender_id, origin_device_id) {
                    continue;
                }
                map.entry(record.node_id)
                    .or_default()
                    .push(DeviceRef::new(user_id.clone(), device_id));
            }
        }
        Ok(map)
    }
}
