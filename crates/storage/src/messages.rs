//! Durable message store.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::PgPool,
    uuid::Uuid,
};

use crate::{NewMessage, Result, StoredMessage};

/// Append-only message persistence and the two read shapes the sync/history
/// reader needs.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert with a freshly generated id. A redelivered payload therefore
    /// produces a second row; the hot window, not the store, deduplicates.
    async fn insert(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Most recent messages first, offset/limit paginated. `page` is
    /// 1-based.
    async fn page(&self, conversation_id: Uuid, page: u32, size: u32)
    -> Result<Vec<StoredMessage>>;

    /// Messages with `sent_at` strictly after `pivot`, ascending, id as
    /// tiebreak, at most `limit` rows.
    async fn after(
        &self,
        conversation_id: Uuid,
        pivot: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>>;
}

type MessageRow = (Uuid, Uuid, Uuid, Option<String>, String, DateTime<Utc>);

fn from_row(row: MessageRow) -> StoredMessage {
    StoredMessage {
        id: row.0,
        conversation_id: row.1,
        sender_id: row.2,
        content: row.3,
        kind: row.4,
        sent_at: row.5,
    }
}

/// Postgres-backed message store.
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<StoredMessage> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, user_id, content, type, sent_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(&message.content)
        .bind(&message.kind)
        .bind(message.sent_at)
        .execute(&self.pool)
        .await?;

        Ok(StoredMessage {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            sent_at: message.sent_at,
        })
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        page: u32,
        size: u32,
    ) -> Result<Vec<StoredMessage>> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(size);
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, user_id, content, type, sent_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY sent_at DESC, id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(i64::from(size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn after(
        &self,
        conversation_id: Uuid,
        pivot: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, user_id, content, type, sent_at
             FROM messages
             WHERE conversation_id = $1 AND sent_at > $2
             ORDER BY sent_at ASC, id ASC
             LIMIT $3",
        )
        .bind(conversation_id)
        .bind(pivot)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(from_row).collect())
    }
}
