//! Sync/history reader: paginated history from the ordered store and a
//! "since timestamp" delta that unions the hot window with the store
//! without overlap.

pub mod reader;
pub mod routes;
pub mod server;

pub use reader::{ConversationDelta, HistoryReader, MessageRecord, SYNC_LIMIT};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] parley_storage::Error),

    #[error(transparent)]
    Cache(#[from] parley_cache::Error),

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}
