//! Builds the per-request dependency graph and enqueues it.
//!
//! Audio attachments fan out to one transcription job each; all images are
//! batched into a single description job; the generation job depends on
//! every preprocessing job and is enqueued last so preprocessors start in
//! parallel.

use tracing::info;

use reverie_core::types::{
    Attachment, AttachmentKind, GenerationRequest, Job, JobDependency, JobKind, JobState,
};

use crate::error::{JobError, Result};
use crate::queue::JobQueue;
use crate::types::{AudioJobData, GenerationJobData, ImageJobData, JobPlan};

/// Deterministic generation job id for a request.
pub fn generation_job_id(request_id: &str) -> String {
    format!("llm-{request_id}")
}

/// Result-store key a dependency's output is written under.
pub fn result_key(request_id: &str, kind: JobKind, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{request_id}:{kind}:{i}"),
        None => format!("{request_id}:{kind}"),
    }
}

/// Validate the request and produce its job plan. Nothing is enqueued here;
/// a validation failure aborts the whole chain before any queue write.
pub fn plan_request(req: &GenerationRequest) -> Result<JobPlan> {
    validate_request(req)?;

    let (audio, images) = split_attachments(&req.attachments)?;

    let mut preprocessing = Vec::new();
    let mut dependencies = Vec::new();

    for (index, attachment) in audio {
        let job_id = format!("audio-{}-{index}", req.request_id);
        let key = result_key(&req.request_id, JobKind::AudioTranscription, Some(index));
        dependencies.push(JobDependency {
            job_id: job_id.clone(),
            result_key: key,
            kind: JobKind::AudioTranscription,
        });
        preprocessing.push(Job {
            id: job_id,
            kind: JobKind::AudioTranscription,
            data: serde_json::to_value(AudioJobData {
                request_id: req.request_id.clone(),
                attachment: attachment.clone(),
                attachment_index: index,
            })?,
            dependencies: Vec::new(),
            state: JobState::Queued,
        });
    }

    if !images.is_empty() {
        let job_id = format!("image-{}", req.request_id);
        let key = result_key(&req.request_id, JobKind::ImageDescription, None);
        dependencies.push(JobDependency {
            job_id: job_id.clone(),
            result_key: key,
            kind: JobKind::ImageDescription,
        });
        preprocessing.push(Job {
            id: job_id,
            kind: JobKind::ImageDescription,
            data: serde_json::to_value(ImageJobData {
                request_id: req.request_id.clone(),
                attachments: images.into_iter().cloned().collect(),
                model: req.personality.model.clone(),
                vision_model: req.personality.vision_model.clone(),
                user_prompt: req.message.clone(),
            })?,
            dependencies: Vec::new(),
            state: JobState::Queued,
        });
    }

    let generation = Job {
        id: generation_job_id(&req.request_id),
        kind: JobKind::LlmGeneration,
        data: serde_json::to_value(GenerationJobData {
            request: req.clone(),
        })?,
        dependencies,
        state: JobState::Queued,
    };

    Ok(JobPlan {
        preprocessing,
        generation,
    })
}

/// Enqueue a validated plan, preprocessing first, generation last.
pub async fn enqueue_plan<Q: JobQueue + ?Sized>(queue: &Q, plan: &JobPlan) -> Result<()> {
    for job in &plan.preprocessing {
        queue.enqueue(job).await?;
    }
    queue.enqueue(&plan.generation).await?;
    info!(
        request_jobs = plan.job_count(),
        generation_job = %plan.generation.id,
        "job chain enqueued"
    );
    Ok(())
}

/// Separate audio from image attachments, rejecting anything else. A list
/// mixing audio and image attachments is also rejected.
fn split_attachments(
    attachments: &[Attachment],
) -> Result<(Vec<(usize, &Attachment)>, Vec<&Attachment>)> {
    let mut audio = Vec::new();
    let mut images = Vec::new();

    for (index, attachment) in attachments.iter().enumerate() {
        match attachment.kind() {
            Some(AttachmentKind::Audio) => audio.push((index, attachment)),
            Some(AttachmentKind::Image) => images.push(attachment),
            None => return Err(JobError::InvalidAttachmentType),
        }
    }

    if !audio.is_empty() && !images.is_empty() {
        return Err(JobError::InvalidAttachmentType);
    }
    Ok((audio, images))
}

fn validate_request(req: &GenerationRequest) -> Result<()> {
    if req.request_id.trim().is_empty() {
        return Err(JobError::Validation("requestId is required".to_string()));
    }
    if req.user_id.trim().is_empty() {
        return Err(JobError::Validation("userId is required".to_string()));
    }
    if req.response_destination.trim().is_empty() {
        return Err(JobError::Validation(
            "responseDestination is required".to_string(),
        ));
    }
    req.personality
        .validate()
        .map_err(|e| JobError::Validation(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::{LlmParams, Personality};

    fn attachment(content_type: &str, name: &str) -> Attachment {
        Attachment {
            url: format!("https://example.com/{name}"),
            name: name.to_string(),
            content_type: content_type.to_string(),
            size: 1024,
            is_voice_message: false,
        }
    }

    fn request(attachments: Vec<Attachment>) -> GenerationRequest {
        GenerationRequest {
            request_id: "req-42".into(),
            user_id: "u1".into(),
            channel_id: Some("c1".into()),
            guild_id: None,
            session_id: None,
            personality: Personality {
                name: "TestBot".into(),
                character: None,
                traits: None,
                tone: None,
                age: None,
                appearance: None,
                likes: None,
                dislikes: None,
                goals: None,
                examples: None,
                protocol: None,
                model: "gpt-4o-mini".into(),
                context_window_tokens: 8000,
                temperature: 1.0,
                max_tokens: 1024,
                vision_model: None,
                params: LlmParams::default(),
            },
            message: "look at this".into(),
            attachments,
            referenced_messages: vec![],
            conversation_history: vec![],
            prior_conversations: vec![],
            user_api_key: None,
            response_destination: "api".into(),
        }
    }

    #[test]
    fn text_only_request_plans_single_generation_job() {
        let plan = plan_request(&request(vec![])).unwrap();
        assert!(plan.preprocessing.is_empty());
        assert_eq!(plan.generation.id, "llm-req-42");
        assert!(plan.generation.dependencies.is_empty());
    }

    #[test]
    fn one_audio_job_per_audio_attachment() {
        let plan = plan_request(&request(vec![
            attachment("audio/ogg", "a.ogg"),
            attachment("audio/mpeg", "b.mp3"),
        ]))
        .unwrap();
        assert_eq!(plan.preprocessing.len(), 2);
        assert!(plan
            .preprocessing
            .iter()
            .all(|j| j.kind == JobKind::AudioTranscription));
        assert_eq!(plan.generation.dependencies.len(), 2);
        assert_eq!(
            plan.generation.dependencies[0].result_key,
            "req-42:audio-transcription:0"
        );
        assert_eq!(
            plan.generation.dependencies[1].result_key,
            "req-42:audio-transcription:1"
        );
    }

    #[test]
    fn all_images_batch_into_one_job() {
        let plan = plan_request(&request(vec![
            attachment("image/png", "a.png"),
            attachment("image/jpeg", "b.jpg"),
            attachment("image/webp", "c.webp"),
        ]))
        .unwrap();
        assert_eq!(plan.preprocessing.len(), 1);
        let job = &plan.preprocessing[0];
        assert_eq!(job.kind, JobKind::ImageDescription);
        let data: ImageJobData = serde_json::from_value(job.data.clone()).unwrap();
        assert_eq!(data.attachments.len(), 3);
        assert_eq!(
            plan.generation.dependencies[0].result_key,
            "req-42:image-description"
        );
    }

    #[test]
    fn unsupported_attachment_rejected() {
        let err = plan_request(&request(vec![attachment("application/pdf", "x.pdf")]))
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidAttachmentType));
        assert_eq!(err.to_string(), "Invalid attachment type");
    }

    #[test]
    fn mixed_attachment_list_rejected() {
        let err = plan_request(&request(vec![
            attachment("audio/ogg", "a.ogg"),
            attachment("image/png", "b.png"),
        ]))
        .unwrap_err();
        assert!(matches!(err, JobError::InvalidAttachmentType));
    }

    #[test]
    fn generation_dependencies_cover_every_preprocessing_job() {
        let plan = plan_request(&request(vec![
            attachment("audio/ogg", "a.ogg"),
            attachment("audio/wav", "b.wav"),
        ]))
        .unwrap();
        let dep_ids: Vec<&str> = plan
            .generation
            .dependencies
            .iter()
            .map(|d| d.job_id.as_str())
            .collect();
        for job in &plan.preprocessing {
            assert!(dep_ids.contains(&job.id.as_str()));
            assert!(job.dependencies.is_empty());
        }
    }

    #[test]
    fn invalid_personality_aborts_whole_chain() {
        let mut req = request(vec![attachment("image/png", "a.png")]);
        req.personality.context_window_tokens = 0;
        assert!(matches!(
            plan_request(&req),
            Err(JobError::Validation(_))
        ));
    }

    #[test]
    fn missing_response_destination_rejected() {
        let mut req = request(vec![]);
        req.response_destination = "".into();
        assert!(matches!(plan_request(&req), Err(JobError::Validation(_))));
    }
}
