use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Worker crashed")]
    WorkerCrashed,

    #[error("embedding worker not ready")]
    NotReady,

    #[error("embed timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
