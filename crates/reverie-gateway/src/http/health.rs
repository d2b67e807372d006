//! Readiness surface — GET /health

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub embedding: EmbeddingStatus,
}

#[derive(Serialize)]
pub struct EmbeddingStatus {
    pub model_loaded: bool,
}

pub async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthReply>) {
    let health = state.embedder.health().await;
    // A dead embedding worker is degraded, not down: generation still works
    // without retrieval.
    (
        StatusCode::OK,
        Json(HealthReply {
            status: if health.model_loaded { "ok" } else { "degraded" },
            embedding: EmbeddingStatus {
                model_loaded: health.model_loaded,
            },
        }),
    )
}
