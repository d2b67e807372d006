//! Cascading LLM-config resolution with an in-memory TTL cache.
//!
//! Tiers, most specific first: per-personality override (keyed by user +
//! personality), channel override, user default, admin singleton, then the
//! hard-coded defaults. First non-null value per field wins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reverie_core::types::LlmParams;

use crate::error::{Result, SettingsError};
use crate::merge::{merge_config_overrides, MergeOutcome};
use crate::types::{ConfigTier, ResolutionSource, ResolvedLlmConfig};

/// Cache entries expire after this many seconds unless configured otherwise.
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Expired-entry sweep cadence, shared with the persona resolver.
pub(crate) const CACHE_SWEEP_SECS: u64 = 60;

/// Storage access for override rows.
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the overrides table. Idempotent.
    pub async fn init_db(pool: &PgPool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS config_overrides (
                tier        TEXT NOT NULL,
                owner_id    TEXT NOT NULL,
                context_id  TEXT NOT NULL DEFAULT '',
                name        TEXT,
                overrides   JSONB NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (tier, owner_id, context_id)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Fetch one tier's override blob, parsed through the whitelist.
    /// Rows that no longer satisfy the whitelist are skipped with a warning
    /// rather than poisoning resolution.
    pub async fn get_override(
        &self,
        tier: ConfigTier,
        owner_id: &str,
        context_id: &str,
    ) -> Result<Option<(LlmParams, Option<String>)>> {
        let row = sqlx::query(
            "SELECT overrides, name FROM config_overrides
             WHERE tier = $1 AND owner_id = $2 AND context_id = $3",
        )
        .bind(tier.to_string())
        .bind(owner_id)
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let blob: Value = row.try_get("overrides")?;
        let name: Option<String> = row.try_get("name")?;
        match serde_json::from_value::<LlmParams>(blob) {
            Ok(params) => Ok(Some((params, name))),
            Err(e) => {
                warn!(%tier, owner_id, err = %e, "stored overrides fail whitelist; ignoring row");
                Ok(None)
            }
        }
    }

    /// Apply a partial update through the merge semantics. `Empty` deletes
    /// the row; `Invalid` is rejected before any write.
    pub async fn apply_override(
        &self,
        tier: ConfigTier,
        owner_id: &str,
        context_id: &str,
        input: &Value,
    ) -> Result<MergeOutcome> {
        let current = sqlx::query(
            "SELECT overrides FROM config_overrides
             WHERE tier = $1 AND owner_id = $2 AND context_id = $3",
        )
        .bind(tier.to_string())
        .bind(owner_id)
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get::<Value, _>("overrides"))
        .transpose()?;

        let outcome = merge_config_overrides(input, current.as_ref());
        match &outcome {
            MergeOutcome::Merged(blob) => {
                sqlx::query(
                    "INSERT INTO config_overrides (tier, owner_id, context_id, overrides, updated_at)
                     VALUES ($1,$2,$3,$4,$5)
                     ON CONFLICT (tier, owner_id, context_id)
                     DO UPDATE SET overrides = $4, updated_at = $5",
                )
                .bind(tier.to_string())
                .bind(owner_id)
                .bind(context_id)
                .bind(blob)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
            }
            MergeOutcome::Empty => {
                sqlx::query(
                    "DELETE FROM config_overrides
                     WHERE tier = $1 AND owner_id = $2 AND context_id = $3",
                )
                .bind(tier.to_string())
                .bind(owner_id)
                .bind(context_id)
                .execute(&self.pool)
                .await?;
            }
            MergeOutcome::Invalid(reason) => {
                return Err(SettingsError::Invalid(reason.clone()));
            }
        }
        Ok(outcome)
    }
}

#[derive(Clone)]
struct CacheEntry {
    resolved: ResolvedLlmConfig,
    cached_at: DateTime<Utc>,
}

/// Resolver with per-(user, personality, channel) caching.
pub struct LlmConfigResolver {
    store: SettingsStore,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl LlmConfigResolver {
    pub fn new(store: SettingsStore) -> Self {
        Self::with_ttl(store, Duration::from_secs(DEFAULT_CACHE_TTL_SECS))
    }

    pub fn with_ttl(store: SettingsStore, ttl: Duration) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve the effective LLM params for a (user, personality, channel)
    /// triple. Cached; the cascade only runs on a miss.
    pub async fn resolve(
        &self,
        user_id: &str,
        personality_id: &str,
        channel_id: Option<&str>,
    ) -> Result<ResolvedLlmConfig> {
        let key = cache_key(user_id, personality_id, channel_id);
        if let Some(hit) = self.cache_lookup(&key) {
            return Ok(hit);
        }

        let personality_tier = self
            .store
            .get_override(ConfigTier::Personality, user_id, personality_id)
            .await?;
        let channel_tier = match channel_id {
            Some(ch) => self.store.get_override(ConfigTier::Channel, ch, "").await?,
            None => None,
        };
        let user_tier = self
            .store
            .get_override(ConfigTier::User, user_id, "")
            .await?;
        let admin_tier = self
            .store
            .get_override(ConfigTier::Admin, "admin", "")
            .await?;

        // Highest-priority tier with any row decides the reported source.
        let (source, source_name) = if let Some((_, ref name)) = personality_tier {
            (ResolutionSource::ContextOverride, name.clone())
        } else if let Some((_, ref name)) = channel_tier {
            (ResolutionSource::ContextOverride, name.clone())
        } else if user_tier.is_some() {
            (ResolutionSource::UserDefault, None)
        } else {
            (ResolutionSource::SystemDefault, None)
        };

        // Field-wise cascade: each tier overlays the ones below it.
        let mut params = LlmParams::default();
        for tier in [admin_tier, user_tier, channel_tier, personality_tier]
            .into_iter()
            .flatten()
        {
            params = tier.0.merged_over(&params);
        }

        let resolved = ResolvedLlmConfig {
            params,
            source,
            source_name,
        };
        self.cache_insert(key, resolved.clone());
        Ok(resolved)
    }

    // ── cache + invalidation ──────────────────────────────────────────────────

    fn cache_lookup(&self, key: &str) -> Option<ResolvedLlmConfig> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(key)?;
        let age = Utc::now()
            .signed_duration_since(entry.cached_at)
            .num_seconds();
        if age < self.ttl.as_secs() as i64 {
            Some(entry.resolved.clone())
        } else {
            None
        }
    }

    fn cache_insert(&self, key: String, resolved: ResolvedLlmConfig) {
        self.cache.lock().unwrap().insert(
            key,
            CacheEntry {
                resolved,
                cached_at: Utc::now(),
            },
        );
    }

    pub fn cache_size(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    /// Targeted eviction, keyed the way the pub/sub channels are.
    pub fn invalidate_user(&self, user_id: &str) {
        self.retain(|key| key_segment(key, 0) != user_id);
    }

    pub fn invalidate_personality(&self, personality_id: &str) {
        self.retain(|key| key_segment(key, 1) != personality_id);
    }

    pub fn invalidate_channel(&self, channel_id: &str) {
        self.retain(|key| key_segment(key, 2) != channel_id);
    }

    /// Admin wildcard: everything goes.
    pub fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
        debug!("settings cache cleared (admin invalidation)");
    }

    fn retain(&self, keep: impl Fn(&str) -> bool) {
        let mut cache = self.cache.lock().unwrap();
        let before = cache.len();
        cache.retain(|k, _| keep(k));
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(evicted, "settings cache entries invalidated");
        }
    }

    /// Drop entries past their TTL. Called by the periodic sweeper.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl.as_secs() as i64;
        let now = Utc::now();
        self.retain_entries(|entry| {
            now.signed_duration_since(entry.cached_at).num_seconds() < ttl
        });
    }

    fn retain_entries(&self, keep: impl Fn(&CacheEntry) -> bool) {
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, v| keep(v));
    }
}

fn cache_key(user_id: &str, personality_id: &str, channel_id: Option<&str>) -> String {
    format!(
        "{user_id}\u{1}{personality_id}\u{1}{}",
        channel_id.unwrap_or("dm")
    )
}

fn key_segment(key: &str, index: usize) -> &str {
    key.split('\u{1}').nth(index).unwrap_or("")
}

/// Periodic expired-entry sweeper for the resolver cache.
pub async fn run_cache_sweeper(
    resolver: std::sync::Arc<LlmConfigResolver>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("settings cache sweeper started");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_uses_dm_placeholder() {
        let with = cache_key("u1", "luna", Some("c1"));
        let without = cache_key("u1", "luna", None);
        assert_ne!(with, without);
        assert_eq!(key_segment(&without, 2), "dm");
    }

    #[test]
    fn key_segments_extract_parts() {
        let key = cache_key("u1", "luna", Some("c9"));
        assert_eq!(key_segment(&key, 0), "u1");
        assert_eq!(key_segment(&key, 1), "luna");
        assert_eq!(key_segment(&key, 2), "c9");
    }
}
