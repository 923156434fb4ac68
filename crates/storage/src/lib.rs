//! The ordered store: durable messages plus conversations and memberships.
//!
//! Production backends run on Postgres through sqlx; the in-memory backends
//! exist for tests and single-process development. Message order within a
//! conversation is `sent_at` ascending with the message id as deterministic
//! tiebreak.

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    uuid::Uuid,
};

pub mod conversations;
mod error;
pub mod memory;
pub mod messages;
mod schema;

pub use {
    conversations::{ConversationStore, PgConversationStore},
    error::{Error, Result},
    memory::{InMemoryConversationStore, InMemoryMessageStore},
    messages::{MessageStore, PgMessageStore},
    schema::init_schema,
};

// ── Row types ────────────────────────────────────────────────────────────────

/// A message accepted for persistence. The store assigns the id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub kind: String,
    pub sent_at: DateTime<Utc>,
}

/// A durable message row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub kind: String,
    pub sent_at: DateTime<Utc>,
}

/// Conversation flavor. Direct conversations have exactly two members and
/// immutable membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    /// Parse the wire/store spelling.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            "channel" => Ok(Self::Channel),
            other => Err(Error::invalid_input(format!(
                "invalid conversation type: {other}"
            ))),
        }
    }
}

/// A conversation row.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub created_at: DateTime<Utc>,
}
