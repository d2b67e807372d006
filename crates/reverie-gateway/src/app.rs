use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use reverie_core::ReverieConfig;
use reverie_embedding::Embedder;
use reverie_jobs::{DeduplicationCache, JobQueue, JobRepo};

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: ReverieConfig,
    pub dedup: DeduplicationCache,
    pub queue: Arc<dyn JobQueue>,
    pub repo: Arc<JobRepo>,
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    pub fn new(
        config: ReverieConfig,
        queue: Arc<dyn JobQueue>,
        repo: Arc<JobRepo>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            config,
            dedup: DeduplicationCache::new(),
            queue,
            repo,
            embedder,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/generate", post(crate::http::generate::generate_handler))
        .route(
            "/ai/job/{job_id}/confirm-delivery",
            post(crate::http::delivery::confirm_delivery_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
