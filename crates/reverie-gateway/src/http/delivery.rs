//! Delivery confirmation — POST /ai/job/{job_id}/confirm-delivery
//!
//! Idempotent: the second confirmation is a no-op reporting the same 200.
//! An unknown job id is a 404.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::warn;

use reverie_jobs::{DeliveryOutcome, JobError};

use crate::app::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReply {
    pub job_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

pub async fn confirm_delivery_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<DeliveryReply>, (StatusCode, Json<ApiError>)> {
    match state.repo.confirm_delivery(&job_id).await {
        Ok(DeliveryOutcome::Confirmed) => Ok(Json(DeliveryReply {
            job_id,
            status: "DELIVERED",
            message: None,
        })),
        Ok(DeliveryOutcome::AlreadyConfirmed) => Ok(Json(DeliveryReply {
            job_id,
            status: "DELIVERED",
            message: Some("Already confirmed"),
        })),
        Err(JobError::NotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("job not found: {job_id}"),
                code: "NOT_FOUND",
            }),
        )),
        Err(e) => {
            warn!(job_id, err = %e, "delivery confirmation failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: e.to_string(),
                    code: "INTERNAL_ERROR",
                }),
            ))
        }
    }
}
