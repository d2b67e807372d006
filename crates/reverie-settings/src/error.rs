use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("pubsub error: {0}")]
    PubSub(#[from] redis::RedisError),

    #[error("invalid overrides: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
