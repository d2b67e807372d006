//! Best-effort suppression of identical submissions in a short window.
//!
//! This is not a mutex: two concurrent duplicates may both miss the cache
//! and both get enqueued. Generation output is content-addressed on the
//! request id, so the downstream cost of a miss is bounded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, info};

use reverie_core::config::{DEDUP_SWEEP_SECS, DEDUP_TTL_SECS};
use reverie_core::types::GenerationRequest;

/// Cached submission, returned to duplicate callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub request_id: String,
    pub job_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Short deterministic hash of a submission.
///
/// `personalityName ⊕ userId ⊕ channelIdOr"dm" ⊕ sha256(message)[0..16]`.
pub fn fingerprint(req: &GenerationRequest) -> String {
    let message_hash = hex::encode(Sha256::digest(req.message.as_bytes()));
    format!(
        "{}:{}:{}:{}",
        req.personality.name,
        req.user_id,
        req.channel_id.as_deref().unwrap_or("dm"),
        &message_hash[..16]
    )
}

/// Process-local deduplication map with a periodic sweeper.
///
/// Lifecycle-owned by the top-level runtime; tests construct their own
/// instance.
pub struct DeduplicationCache {
    entries: Arc<Mutex<HashMap<String, DedupEntry>>>,
    ttl: Duration,
    shutdown: watch::Sender<bool>,
}

impl DeduplicationCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEDUP_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let entries: Arc<Mutex<HashMap<String, DedupEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let sweep_entries = Arc::clone(&entries);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(DEDUP_SWEEP_SECS));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let mut map = sweep_entries.lock().unwrap();
                        let before = map.len();
                        map.retain(|_, e| e.expires_at > now);
                        let swept = before - map.len();
                        if swept > 0 {
                            debug!(swept, "dedup entries expired");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            entries,
            ttl,
            shutdown: shutdown_tx,
        }
    }

    /// Look up a submission. Expired entries are purged lazily on read.
    pub fn check_duplicate(&self, req: &GenerationRequest) -> Option<DedupEntry> {
        let key = fingerprint(req);
        let mut map = self.entries.lock().unwrap();
        match map.get(&key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.clone()),
            Some(_) => {
                map.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Record a fresh submission for the dedup window.
    pub fn cache_request(&self, req: &GenerationRequest, request_id: &str, job_id: &str) {
        let key = fingerprint(req);
        let entry = DedupEntry {
            request_id: request_id.to_string(),
            job_id: job_id.to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
        };
        self.entries.lock().unwrap().insert(key, entry);
    }

    pub fn cache_size(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Stop the sweeper and clear the map.
    pub fn dispose(&self) {
        let _ = self.shutdown.send(true);
        self.entries.lock().unwrap().clear();
        info!("deduplication cache disposed");
    }
}

impl Default for DeduplicationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::{LlmParams, Personality};

    fn request(message: &str, channel: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            request_id: "r1".into(),
            user_id: "u1".into(),
            channel_id: channel.map(String::from),
            guild_id: None,
            session_id: None,
            personality: Personality {
                name: "TestBot".into(),
                character: None,
                traits: None,
                tone: None,
                age: None,
                appearance: None,
                likes: None,
                dislikes: None,
                goals: None,
                examples: None,
                protocol: None,
                model: "gpt-4o-mini".into(),
                context_window_tokens: 8000,
                temperature: 1.0,
                max_tokens: 1024,
                vision_model: None,
                params: LlmParams::default(),
            },
            message: message.into(),
            attachments: vec![],
            referenced_messages: vec![],
            conversation_history: vec![],
            prior_conversations: vec![],
            user_api_key: None,
            response_destination: "api".into(),
        }
    }

    #[test]
    fn fingerprint_uses_dm_for_missing_channel() {
        let with = fingerprint(&request("Hi", Some("c1")));
        let without = fingerprint(&request("Hi", None));
        assert!(with.contains(":c1:"));
        assert!(without.contains(":dm:"));
        assert_ne!(with, without);
    }

    #[test]
    fn fingerprint_differs_by_message() {
        assert_ne!(
            fingerprint(&request("Hi", None)),
            fingerprint(&request("Bye", None))
        );
    }

    #[tokio::test]
    async fn duplicate_within_window_returns_same_job_id() {
        let cache = DeduplicationCache::new();
        let req = request("Hi", Some("c1"));

        assert!(cache.check_duplicate(&req).is_none());
        cache.cache_request(&req, "req-1", "llm-req-1");

        let hit = cache.check_duplicate(&req).expect("should hit");
        assert_eq!(hit.job_id, "llm-req-1");
        assert_eq!(hit.request_id, "req-1");
        cache.dispose();
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = DeduplicationCache::with_ttl(Duration::from_millis(30));
        let req = request("Hi", Some("c1"));
        cache.cache_request(&req, "req-1", "llm-req-1");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.check_duplicate(&req).is_none());
        // Lazy purge removed the stale entry on read.
        assert_eq!(cache.cache_size(), 0);
        cache.dispose();
    }

    #[tokio::test]
    async fn dispose_clears_entries() {
        let cache = DeduplicationCache::new();
        let req = request("Hi", None);
        cache.cache_request(&req, "req-1", "llm-req-1");
        assert_eq!(cache.cache_size(), 1);

        cache.dispose();
        assert_eq!(cache.cache_size(), 0);
    }
}
