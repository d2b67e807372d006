//! Persona selection — the switch-mode resolver.
//!
//! Unlike LLM params, a persona override replaces the user's default
//! wholesale: per-personality override, else the user's default persona,
//! else none. Same TTL cache and invalidation surface as the params
//! resolver.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Result;
use crate::invalidation::CacheInvalidate;
use crate::resolver::CACHE_SWEEP_SECS;
use crate::types::ResolutionSource;

/// Resolved speaker identity for prompt purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaChoice {
    pub persona_id: String,
    pub persona_name: String,
    pub username: String,
    pub source: ResolutionSource,
}

#[derive(Clone)]
struct CacheEntry {
    choice: Option<PersonaChoice>,
    cached_at: DateTime<Utc>,
}

pub struct PersonaResolver {
    pool: PgPool,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl PersonaResolver {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Create the override table. Idempotent.
    pub async fn init_db(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS persona_overrides (
                user_id         TEXT NOT NULL,
                personality_id  TEXT NOT NULL,
                persona_id      TEXT NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (user_id, personality_id)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Resolve the persona a user speaks as toward one personality.
    /// `None` when the user has neither an override nor a default persona.
    pub async fn resolve(
        &self,
        user_id: &str,
        personality_id: &str,
    ) -> Result<Option<PersonaChoice>> {
        let key = format!("{user_id}\u{1}{personality_id}");
        if let Some(entry) = self.cache_lookup(&key) {
            return Ok(entry);
        }

        // Switch semantics: the override wins outright, no field merging.
        let row = sqlx::query(
            "SELECT p.id, p.name, u.username
             FROM persona_overrides po
             JOIN personas p ON p.id = po.persona_id
             JOIN users u ON u.id = po.user_id OR u.platform_id = po.user_id
             WHERE po.user_id = $1 AND po.personality_id = $2
             LIMIT 1",
        )
        .bind(user_id)
        .bind(personality_id)
        .fetch_optional(&self.pool)
        .await?;

        let choice = match row {
            Some(row) => Some(PersonaChoice {
                persona_id: row.try_get("id")?,
                persona_name: row.try_get("name")?,
                username: row.try_get("username")?,
                source: ResolutionSource::ContextOverride,
            }),
            None => {
                let row = sqlx::query(
                    "SELECT p.id, p.name, u.username
                     FROM users u
                     JOIN personas p ON p.id = u.default_persona_id
                     WHERE u.id = $1 OR u.platform_id = $1
                     LIMIT 1",
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
                row.map(|row| {
                    Ok::<_, sqlx::Error>(PersonaChoice {
                        persona_id: row.try_get("id")?,
                        persona_name: row.try_get("name")?,
                        username: row.try_get("username")?,
                        source: ResolutionSource::UserDefault,
                    })
                })
                .transpose()?
            }
        };

        self.cache
            .lock()
            .unwrap()
            .insert(
                key,
                CacheEntry {
                    choice: choice.clone(),
                    cached_at: Utc::now(),
                },
            );
        Ok(choice)
    }

    fn cache_lookup(&self, key: &str) -> Option<Option<PersonaChoice>> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(key)?;
        let age = Utc::now()
            .signed_duration_since(entry.cached_at)
            .num_seconds();
        if age < self.ttl.as_secs() as i64 {
            Some(entry.choice.clone())
        } else {
            None
        }
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Drop entries past their TTL. Called by the periodic sweeper.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl.as_secs() as i64;
        let now = Utc::now();
        let mut cache = self.cache.lock().unwrap();
        let before = cache.len();
        cache.retain(|_, entry| {
            now.signed_duration_since(entry.cached_at).num_seconds() < ttl
        });
        let swept = before - cache.len();
        if swept > 0 {
            debug!(swept, "expired persona cache entries swept");
        }
    }
}

/// Periodic expired-entry sweeper for the persona cache.
pub async fn run_persona_cache_sweeper(
    resolver: std::sync::Arc<PersonaResolver>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("persona cache sweeper started");
    let mut interval = tokio::time::interval(Duration::from_secs(CACHE_SWEEP_SECS));
    loop {
        tokio::select! {
            _ = interval.tick() => resolver.sweep_expired(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

impl CacheInvalidate for PersonaResolver {
    fn invalidate_user(&self, user_id: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|k, _| k.split('\u{1}').next() != Some(user_id));
        debug!(user_id, "persona cache entries invalidated");
    }

    fn invalidate_personality(&self, personality_id: &str) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|k, _| k.split('\u{1}').nth(1) != Some(personality_id));
    }

    fn invalidate_channel(&self, _channel_id: &str) {
        // Persona choice is channel-independent.
    }

    fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }
}
