//! Per-conversation hot window: the last ≤100 messages, served without
//! touching the ordered store.
//!
//! Members are JSON payload strings scored by `sent_at`, so a replayed
//! payload lands on its existing entry (set semantics). The window is never
//! the sole copy of a message; the ordered store stays authoritative.

use std::error::Error as StdError;

use async_trait::async_trait;

use parley_protocol::HOT_WINDOW_LIMIT;

pub mod store_memory;
pub mod store_redis;

pub use {store_memory::InMemoryHotWindow, store_redis::RedisHotWindow};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hot window backend failed: {context}: {source}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn backend(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// The hot-window contract.
#[async_trait]
pub trait HotWindow: Send + Sync {
    /// Insert `payload` at score `sent_at`, then trim the window to the most
    /// recent [`HOT_WINDOW_LIMIT`] entries.
    async fn append(&self, conversation_id: &str, payload: &str, sent_at: f64) -> Result<()>;

    /// Entries with score strictly greater than `since`, ascending by score.
    async fn after(&self, conversation_id: &str, since: f64) -> Result<Vec<String>>;
}

pub(crate) const LIMIT: usize = HOT_WINDOW_LIMIT;
