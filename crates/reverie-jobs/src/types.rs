use serde::{Deserialize, Serialize};

use reverie_core::types::{Attachment, GenerationRequest, Job};

/// Output of the planner: every preprocessing job for a request plus the
/// single generation job that depends on all of them.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub preprocessing: Vec<Job>,
    pub generation: Job,
}

impl JobPlan {
    pub fn job_count(&self) -> usize {
        self.preprocessing.len() + 1
    }
}

/// Payload of an audio-transcription job: exactly one attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioJobData {
    pub request_id: String,
    pub attachment: Attachment,
    pub attachment_index: usize,
}

/// Payload of an image-description job: all images of the request batched
/// into one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJobData {
    pub request_id: String,
    pub attachments: Vec<Attachment>,
    /// Main model of the personality, used for vision-capability routing.
    pub model: String,
    #[serde(default)]
    pub vision_model: Option<String>,
    pub user_prompt: String,
}

/// Payload of the generation job — the full immutable request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJobData {
    pub request: GenerationRequest,
}

/// Result of one audio-transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResult {
    pub success: bool,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribedImage {
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptionMetadata {
    pub image_count: usize,
    pub failed_count: usize,
    pub processing_time_ms: u64,
}

/// Result of one image-description job. Partial failure keeps
/// `success = true` with `metadata.failed_count` reflecting the loss.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDescriptionResult {
    pub success: bool,
    #[serde(default)]
    pub descriptions: Vec<DescribedImage>,
    pub metadata: ImageDescriptionMetadata,
    #[serde(default)]
    pub error: Option<String>,
}

/// Final generation result written to the keyed store and result stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmGenerationResult {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachment_descriptions: Option<String>,
    #[serde(default)]
    pub referenced_messages_descriptions: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Delivery status of a stored job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    PendingDelivery,
    Delivered,
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingDelivery => write!(f, "PENDING_DELIVERY"),
            Self::Delivered => write!(f, "DELIVERED"),
        }
    }
}
