//! Redis-backed hot window: one sorted set per conversation at
//! `chat:<conversation_id>:messages`.

use deadpool_redis::{Config, Connection, Pool, Runtime, redis::AsyncCommands};

use parley_protocol::hot_window_key;

use crate::{Error, HotWindow, LIMIT, Result};

pub struct RedisHotWindow {
    pool: Pool,
}

impl RedisHotWindow {
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
}

#[async_trait::async_trait]
impl HotWindow for RedisHotWindow {
    async fn append(&self, conversation_id: &str, payload: &str, sent_at: f64) -> Result<()> {
        let key = hot_window_key(conversation_id);
        let mut con = self.conn().await?;

        let _: () = con
            .zadd(&key, payload, sent_at)
            .await
            .map_err(|e| Error::backend("appending to hot window", e))?;
        // Keep only the highest-scored LIMIT entries.
        let _: () = con
            .zremrangebyrank(&key, 0, -(LIMIT as isize) - 1)
            .await
            .map_err(|e| Error::backend("trimming hot window", e))?;
        Ok(())
    }

    async fn after(&self, conversation_id: &str, since: f64) -> Result<Vec<String>> {
        let key = hot_window_key(conversation_id);
        let mut con = self.conn().await?;

        con.zrangebyscore(&key, format!("({since}"), "+inf")
            .await
            .map_err(|e| Error::backend("reading hot window", e))
    }
}
