use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("invalid memory: {0}")]
    Invalid(String),

    #[error("memory not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
