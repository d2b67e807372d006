pub mod error;
pub mod provider;
pub mod vector;
pub mod worker;

pub use error::EmbeddingError;
pub use provider::{Embedder, EmbeddingHealth, WorkerEmbedder};
pub use worker::EmbeddingWorker;
