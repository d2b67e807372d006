use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility class for a memory.
///
/// Global memories are shared by every user of a personality; personal ones
/// belong to a single persona; session memories live inside one ephemeral
/// conversation and require a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonScope {
    Global,
    Personal,
    Session,
}

impl std::fmt::Display for CanonScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Personal => write!(f, "personal"),
            Self::Session => write!(f, "session"),
        }
    }
}

impl std::str::FromStr for CanonScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Self::Global),
            "personal" => Ok(Self::Personal),
            "session" => Ok(Self::Session),
            other => Err(format!("unknown canon scope: {other}")),
        }
    }
}

/// Chunking metadata for long memories split across rows.
/// All three fields are set together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInfo {
    pub group_id: String,
    pub index: i32,
    pub total: i32,
}

/// Input to `MemoryStore::add_memory`. The embedding is computed inside the
/// store; rows are immutable once the vector is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemory {
    pub persona_id: String,
    pub personality_id: String,
    pub content: String,
    pub canon_scope: CanonScope,
    pub summary_type: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub senders: Vec<String>,
    #[serde(default)]
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub chunk: Option<ChunkInfo>,
}

impl NewMemory {
    /// Scope invariants: session scope needs a session id; chunk fields are
    /// all-or-nothing (enforced by `ChunkInfo` being one struct).
    pub fn validate(&self) -> Result<(), String> {
        if self.canon_scope == CanonScope::Session && self.session_id.is_none() {
            return Err("session-scoped memory requires sessionId".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("memory content must not be empty".to_string());
        }
        Ok(())
    }
}

/// A memory row returned from a similarity query, enriched with the owning
/// persona/personality display names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedMemory {
    pub id: uuid::Uuid,
    pub persona_id: String,
    pub personality_id: String,
    pub content: String,
    pub canon_scope: CanonScope,
    pub summary_type: String,
    pub channel_id: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity against the query vector (1 − pgvector distance).
    pub similarity: f64,
    pub persona_name: Option<String>,
    pub personality_name: Option<String>,
}

/// Outbox row mirroring a memory before its embedding is written.
#[derive(Debug, Clone)]
pub struct PendingMemory {
    pub id: uuid::Uuid,
    pub payload: NewMemory,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Options for a similarity query.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    /// Requesting persona — required; scopes are resolved against it.
    pub persona_id: String,
    /// Restrict to one personality when set.
    pub personality_id: Option<String>,
    pub limit: usize,
    /// Minimum cosine similarity (distance < 1 − threshold).
    pub score_threshold: f64,
    /// Exclude rows newer than the conversation-history horizon.
    pub exclude_newer_than: Option<DateTime<Utc>>,
    /// Waterfall dedup: rows already returned by earlier queries.
    pub exclude_ids: Vec<uuid::Uuid>,
    /// Channel-scoped queries.
    pub channel_ids: Vec<String>,
    /// Which scopes the caller may see.
    pub scopes: Vec<CanonScope>,
    /// Active session for session-scope matching.
    pub session_id: Option<String>,
}

impl MemoryQuery {
    pub fn new(persona_id: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            personality_id: None,
            limit: 10,
            score_threshold: 0.85,
            exclude_newer_than: None,
            exclude_ids: Vec::new(),
            channel_ids: Vec::new(),
            scopes: vec![CanonScope::Global, CanonScope::Personal],
            session_id: None,
        }
    }
}
