//! User/persona lookups used by mention resolution in the context assembler.
//!
//! The trait lives here (leaf-ward, next to the data it reads) so the
//! assembler can take a fake in tests without a database.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::Result;

/// Minimal projection of a user for prompt purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub user_id: String,
    pub username: String,
    pub persona_id: String,
    pub persona_name: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Legacy shapes markdown: `@[name](user:<uuid>)` — uuid from the
    /// mapping table.
    async fn by_shapes_uuid(&self, uuid: &str) -> Option<UserRef>;
    /// Platform mention `<@snowflake>` (17–20 digit id).
    async fn by_platform_id(&self, snowflake: &str) -> Option<UserRef>;
    /// Simple `@word` mention, case-insensitive username match.
    async fn by_username(&self, name: &str) -> Option<UserRef>;
}

/// Postgres-backed directory joining users to their default personas.
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the users table this directory reads. Idempotent.
    pub async fn init_db(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL,
                platform_id         TEXT UNIQUE,
                shapes_uuid         TEXT UNIQUE,
                default_persona_id  TEXT,
                created_at          TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS users_username_ci_idx ON users (lower(username))")
            .execute(pool)
            .await?;
        Ok(())
    }

    async fn fetch(&self, clause: &str, value: &str) -> Option<UserRef> {
        let sql = format!(
            "SELECT u.id, u.username, p.id AS persona_id, p.name AS persona_name
             FROM users u
             JOIN personas p ON p.id = u.default_persona_id
             WHERE {clause}
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .ok()??;
        Some(UserRef {
            user_id: row.try_get("id").ok()?,
            username: row.try_get("username").ok()?,
            persona_id: row.try_get("persona_id").ok()?,
            persona_name: row.try_get("persona_name").ok()?,
        })
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn by_shapes_uuid(&self, uuid: &str) -> Option<UserRef> {
        self.fetch("u.shapes_uuid = $1", uuid).await
    }

    async fn by_platform_id(&self, snowflake: &str) -> Option<UserRef> {
        self.fetch("u.platform_id = $1", snowflake).await
    }

    async fn by_username(&self, name: &str) -> Option<UserRef> {
        self.fetch("lower(u.username) = lower($1)", name).await
    }
}
