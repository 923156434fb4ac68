//! Schema bootstrap for store-backed services.

use sqlx::PgPool;

use crate::Result;

/// Create the store tables if they do not exist yet. Safe to run on every
/// service start.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversations (
            id         UUID PRIMARY KEY,
            name       TEXT,
            type       TEXT        NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users_conversation (
            id              UUID PRIMARY KEY,
            user_id         UUID        NOT NULL,
            conversation_id UUID        NOT NULL REFERENCES conversations (id),
            role_in_convo   TEXT        NOT NULL DEFAULT 'member',
            joined_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
            UNIQUE (conversation_id, user_id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id              UUID PRIMARY KEY,
            conversation_id UUID        NOT NULL,
            user_id         UUID        NOT NULL,
            content         TEXT,
            type            TEXT        NOT NULL,
            sent_at         TIMESTAMPTZ NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation_sent
         ON messages (conversation_id, sent_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_users_conversation_user
         ON users_conversation (user_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
