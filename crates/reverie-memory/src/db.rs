//! Schema bootstrap for the memory subsystem.

use sqlx::PgPool;

use crate::error::Result;

/// Create the pgvector extension and the tables this crate owns.
/// Idempotent; runs at startup.
pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS personas (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            name         TEXT NOT NULL,
            username     TEXT,
            description  TEXT,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS personalities (
            id           TEXT PRIMARY KEY,
            slug         TEXT NOT NULL UNIQUE,
            name         TEXT NOT NULL,
            created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS memories (
            id              UUID PRIMARY KEY,
            persona_id      TEXT NOT NULL,
            personality_id  TEXT NOT NULL,
            content         TEXT NOT NULL,
            embedding       vector(384) NOT NULL,
            canon_scope     TEXT NOT NULL,
            summary_type    TEXT NOT NULL,
            channel_id      TEXT,
            guild_id        TEXT,
            session_id      TEXT,
            senders         JSONB NOT NULL DEFAULT '[]',
            message_ids     JSONB NOT NULL DEFAULT '[]',
            chunk_group_id  TEXT,
            chunk_index     INTEGER,
            total_chunks    INTEGER,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
            CHECK (
                (chunk_group_id IS NULL AND chunk_index IS NULL AND total_chunks IS NULL)
                OR
                (chunk_group_id IS NOT NULL AND chunk_index IS NOT NULL AND total_chunks IS NOT NULL)
            )
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS memories_embedding_idx
         ON memories USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS memories_owner_idx
         ON memories (personality_id, persona_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pending_memories (
            id               UUID PRIMARY KEY,
            payload          JSONB NOT NULL,
            attempts         INTEGER NOT NULL DEFAULT 0,
            last_attempt_at  TIMESTAMPTZ,
            last_error       TEXT,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}
