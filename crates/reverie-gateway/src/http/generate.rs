//! Job submission endpoint — POST /generate
//!
//! Request:  `{"personality": {...}, "message": "...", "context": {...}}`
//! Response: `202 Accepted` with `{jobId, requestId, status:"queued"}`.
//! A duplicate submission within the dedup window returns the cached job id.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use reverie_core::types::{
    Attachment, ConversationTurn, GenerationRequest, Personality, PriorChannelGroup,
    ReferencedMessage,
};
use reverie_jobs::{enqueue_plan, plan_request, JobError};

use crate::app::AppState;

#[derive(Deserialize)]
pub struct GenerateBody {
    pub personality: Personality,
    pub message: String,
    pub context: GenerateContext,
    #[serde(default)]
    pub user_api_key: Option<String>,
    #[serde(default)]
    pub response_destination: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContext {
    pub user_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub referenced_messages: Vec<ReferencedMessage>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub prior_conversations: Vec<PriorChannelGroup>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReply {
    pub job_id: String,
    pub request_id: String,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
}

type HandlerResult = Result<(StatusCode, Json<GenerateReply>), (StatusCode, Json<ApiError>)>;

pub async fn generate_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateBody>,
) -> HandlerResult {
    if body.message.trim().is_empty() && body.context.attachments.is_empty() {
        return Err(bad_request("message or attachments required"));
    }

    let request = GenerationRequest {
        request_id: Uuid::new_v4().to_string(),
        user_id: body.context.user_id,
        channel_id: body.context.channel_id,
        guild_id: body.context.server_id,
        session_id: body.context.session_id,
        personality: body.personality,
        message: body.message,
        attachments: body.context.attachments,
        referenced_messages: body.context.referenced_messages,
        conversation_history: body.context.conversation_history,
        prior_conversations: body.context.prior_conversations,
        user_api_key: body.user_api_key,
        response_destination: body
            .response_destination
            .unwrap_or_else(|| "api".to_string()),
    };

    // Short-circuit: an identical submission inside the window gets the
    // original job id back instead of a second chain.
    if let Some(entry) = state.dedup.check_duplicate(&request) {
        info!(
            request_id = %entry.request_id,
            job_id = %entry.job_id,
            "duplicate submission suppressed"
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(GenerateReply {
                job_id: entry.job_id,
                request_id: entry.request_id,
                status: "queued",
            }),
        ));
    }

    let plan = plan_request(&request).map_err(|e| match e {
        JobError::InvalidAttachmentType => bad_request("Invalid attachment type"),
        JobError::Validation(msg) => bad_request(&msg),
        other => internal(&other.to_string()),
    })?;

    // Durable rows first so a queue hiccup can't leave untracked jobs.
    for job in plan.preprocessing.iter().chain([&plan.generation]) {
        if let Err(e) = state.repo.insert_job(job, &request.request_id).await {
            warn!(job_id = %job.id, err = %e, "job row insert failed");
            return Err(internal("job persistence failed"));
        }
    }
    if let Err(e) = enqueue_plan(state.queue.as_ref(), &plan).await {
        warn!(request_id = %request.request_id, err = %e, "enqueue failed");
        return Err(internal("enqueue failed"));
    }

    state
        .dedup
        .cache_request(&request, &request.request_id, &plan.generation.id);

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateReply {
            job_id: plan.generation.id.clone(),
            request_id: request.request_id.clone(),
            status: "queued",
        }),
    ))
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.to_string(),
            code: "VALIDATION_ERROR",
        }),
    )
}

fn internal(message: &str) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            error: message.to_string(),
            code: "INTERNAL_ERROR",
        }),
    )
}
