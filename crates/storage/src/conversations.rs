//! Conversation and membership store.
//!
//! The fan-out publisher only needs [`ConversationStore::members`]; the rest
//! of the surface backs the conversation routes on the history service.

use {
    async_trait::async_trait,
    sqlx::PgPool,
    uuid::Uuid,
};

use crate::{Conversation, ConversationKind, Error, Result};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation with initial members.
    ///
    /// Direct conversations require exactly two distinct users, and at most
    /// one direct conversation exists per pair: creating it again returns
    /// the existing one.
    async fn create(
        &self,
        name: Option<String>,
        kind: ConversationKind,
        user_ids: &[Uuid],
    ) -> Result<Conversation>;

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Member user ids of a conversation.
    async fn members(&self, conversation_id: Uuid) -> Result<Vec<Uuid>>;

    /// Add members, skipping users that already belong.
    async fn add_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()>;

    async fn remove_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()>;

    /// Every conversation the user belongs to.
    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>>;
}

pub(crate) fn validate_direct(kind: ConversationKind, user_ids: &[Uuid]) -> Result<()> {
    if kind == ConversationKind::Direct {
        let mut distinct = user_ids.to_vec();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != 2 {
            return Err(Error::invalid_input(
                "Direct chat requires exactly 2 users",
            ));
        }
    }
    Ok(())
}

type ConversationRow = (Uuid, Option<String>, String, chrono::DateTime<chrono::Utc>);

fn from_row(row: ConversationRow) -> Result<Conversation> {
    Ok(Conversation {
        id: row.0,
        name: row.1,
        kind: ConversationKind::parse(&row.2)?,
        created_at: row.3,
    })
}

/// Postgres-backed conversation store.
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_direct(&self, user_ids: &[Uuid]) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT c.id, c.name, c.type, c.created_at
             FROM conversations c
             JOIN users_conversation uc ON uc.conversation_id = c.id
             WHERE c.type = 'direct' AND uc.user_id = ANY($1)
             GROUP BY c.id, c.name, c.type, c.created_at
             HAVING COUNT(uc.user_id) = 2
             LIMIT 1",
        )
        .bind(user_ids.to_vec())
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row).transpose()
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create(
        &self,
        name: Option<String>,
        kind: ConversationKind,
        user_ids: &[Uuid],
    ) -> Result<Conversation> {
        validate_direct(kind, user_ids)?;
        if kind == ConversationKind::Direct {
            if let Some(existing) = self.find_direct(user_ids).await? {
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, ConversationRow>(
            "INSERT INTO conversations (id, name, type)
             VALUES ($1, $2, $3)
             RETURNING id, name, type, created_at",
        )
        .bind(id)
        .bind(&name)
        .bind(kind.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for user_id in user_ids {
            sqlx::query(
                "INSERT INTO users_conversation (id, user_id, conversation_id, role_in_convo)
                 VALUES ($1, $2, $3, 'member')
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        from_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, name, type, created_at FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(from_row).transpose()
    }

    async fn members(&self, conversation_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT user_id FROM users_conversation WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(user_id,)| user_id).collect())
    }

    async fn add_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()> {
        if self.get(conversation_id).await?.is_none() {
            return Err(Error::not_found("Conversation"));
        }
        for user_id in user_ids {
            sqlx::query(
                "INSERT INTO users_conversation (id, user_id, conversation_id, role_in_convo)
                 VALUES ($1, $2, $3, 'member')
                 ON CONFLICT (conversation_id, user_id) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn remove_members(&self, conversation_id: Uuid, user_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            "DELETE FROM users_conversation
             WHERE conversation_id = $1 AND user_id = ANY($2)",
        )
        .bind(conversation_id)
        .bind(user_ids.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            "SELECT conversation_id FROM users_conversation WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(conversation_id,)| conversation_id).collect())
    }
}
