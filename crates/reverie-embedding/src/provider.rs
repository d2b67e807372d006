//! The `Embedder` seam used by the memory store and generation workers.
//!
//! Collaborators take `Arc<dyn Embedder>` so tests can pass fakes instead
//! of a live worker process.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::vector::{is_l2_normalized, l2_normalize};
use crate::worker::EmbeddingWorker;

/// Recent embeddings kept for sliding-window duplicate detection.
const RECENT_CACHE_ENTRIES: usize = 10;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EmbeddingHealth {
    pub model_loaded: bool,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Compute the 384-dim L2-normalized embedding of `text`.
    ///
    /// Returns `None` on worker failure or timeout — callers degrade rather
    /// than fail the surrounding job.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    async fn health(&self) -> EmbeddingHealth;

    fn is_ready(&self) -> bool;
}

/// Production embedder backed by the child worker process, with a small LRU
/// over recently embedded texts.
pub struct WorkerEmbedder {
    worker: EmbeddingWorker,
    recent: Mutex<LruCache<String, Vec<f32>>>,
}

impl WorkerEmbedder {
    pub fn new(worker: EmbeddingWorker) -> Self {
        Self {
            worker,
            recent: Mutex::new(LruCache::new(
                NonZeroUsize::new(RECENT_CACHE_ENTRIES).unwrap(),
            )),
        }
    }

    pub async fn shutdown(&self) {
        self.worker.shutdown().await;
    }

    fn cache_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }
}

#[async_trait]
impl Embedder for WorkerEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(hit) = self.recent.lock().unwrap().get(&key).cloned() {
            return Some(hit);
        }

        match self.worker.embed(text).await {
            Ok(mut v) => {
                // The model emits normalized vectors; guard against drift
                // from a misconfigured worker.
                if !is_l2_normalized(&v) {
                    l2_normalize(&mut v);
                }
                self.recent.lock().unwrap().put(key, v.clone());
                Some(v)
            }
            Err(e) => {
                warn!(err = %e, "embed failed; degrading to no vector");
                None
            }
        }
    }

    async fn health(&self) -> EmbeddingHealth {
        let model_loaded = self.worker.health().await.unwrap_or(false);
        EmbeddingHealth { model_loaded }
    }

    fn is_ready(&self) -> bool {
        self.worker.is_ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic fake: hashes the text into a normalized vector.
    pub struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> Option<Vec<f32>> {
            let digest = Sha256::digest(text.as_bytes());
            let mut v: Vec<f32> = digest.iter().map(|b| *b as f32 / 255.0).collect();
            crate::vector::l2_normalize(&mut v);
            Some(v)
        }

        async fn health(&self) -> EmbeddingHealth {
            EmbeddingHealth { model_loaded: true }
        }

        fn is_ready(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn fake_embedder_is_deterministic_and_normalized() {
        let e = FakeEmbedder;
        let a = e.embed("hello").await.unwrap();
        let b = e.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert!(crate::vector::is_l2_normalized(&a));
    }
}
