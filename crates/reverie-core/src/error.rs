use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReverieError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {kind} {id}")]
    NotFound { kind: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReverieError {
    /// Short error code string surfaced in HTTP error bodies and job results.
    pub fn code(&self) -> &'static str {
        match self {
            ReverieError::Config(_) => "CONFIG_ERROR",
            ReverieError::Validation(_) => "VALIDATION_ERROR",
            ReverieError::Unauthorized(_) => "UNAUTHORIZED",
            ReverieError::NotFound { .. } => "NOT_FOUND",
            ReverieError::Conflict(_) => "CONFLICT",
            ReverieError::Database(_) => "DATABASE_ERROR",
            ReverieError::Queue(_) => "QUEUE_ERROR",
            ReverieError::Embedding(_) => "EMBEDDING_ERROR",
            ReverieError::Provider(_) => "PROVIDER_ERROR",
            ReverieError::Serialization(_) => "SERIALIZATION_ERROR",
            ReverieError::Io(_) => "IO_ERROR",
            ReverieError::Timeout { .. } => "TIMEOUT",
            ReverieError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Transient errors are safe to retry with backoff; everything else is
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReverieError::Queue(_)
                | ReverieError::Embedding(_)
                | ReverieError::Timeout { .. }
                | ReverieError::Io(_)
        )
    }

    pub fn not_found(kind: &str, id: &str) -> Self {
        ReverieError::NotFound {
            kind: kind.to_string(),
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReverieError>;
