//! Image description worker with bounded fan-out and graceful degradation.
//!
//! Every image in the batch is described concurrently (bounded by the
//! configured fan-out), each with its own retry budget. One surviving
//! description keeps the job successful; only a total wipeout fails it,
//! with the per-image errors aggregated.

use std::pin::Pin;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::Future;
use futures_util::stream::{self, StreamExt};
use tracing::warn;

use reverie_core::retry::{with_retry, RetryPolicy};
use reverie_core::types::{Attachment, AttachmentKind};
use reverie_jobs::types::{DescribedImage, ImageDescriptionMetadata, ImageDescriptionResult, ImageJobData};

use crate::vision::route_vision_model;

/// Seam for the vision backend.
#[async_trait]
pub trait VisionDescriber: Send + Sync {
    async fn describe(
        &self,
        image_url: &str,
        user_prompt: &str,
        model: &str,
    ) -> Result<String, String>;
}

/// Vision backend over the chat-completions API with image content parts.
pub struct HttpVisionDescriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpVisionDescriber {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl VisionDescriber for HttpVisionDescriber {
    async fn describe(
        &self,
        image_url: &str,
        user_prompt: &str,
        model: &str,
    ) -> Result<String, String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let prompt = if user_prompt.trim().is_empty() {
            "Describe this image in detail.".to_string()
        } else {
            format!("Describe this image in the context of: {user_prompt}")
        };
        let body = serde_json::json!({
            "model": model,
            "max_tokens": 512,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }]
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("vision call failed ({status}): {text}"));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| "vision response missing content".to_string())
    }
}

/// Process one image-description job.
pub async fn process_image_job(
    describer: &dyn VisionDescriber,
    data: &ImageJobData,
    fanout: usize,
    fallback_model: &str,
) -> ImageDescriptionResult {
    let started = Instant::now();
    let image_count = data.attachments.len();

    // The planner batches only images into this job; a stray non-image
    // attachment is a classifier violation.
    if data
        .attachments
        .iter()
        .any(|a| a.kind() != Some(AttachmentKind::Image))
    {
        return ImageDescriptionResult {
            success: false,
            descriptions: Vec::new(),
            metadata: ImageDescriptionMetadata {
                image_count,
                failed_count: image_count,
                processing_time_ms: elapsed_ms(started),
            },
            error: Some("Invalid attachment type".to_string()),
        };
    }

    let model = route_vision_model(data.vision_model.as_deref(), &data.model, fallback_model);

    // Bounded concurrent fan-out; each image is a `Result`, aggregated at
    // the boundary instead of thrown across it.
    let futures: Vec<Pin<Box<dyn Future<Output = Result<DescribedImage, String>> + Send + '_>>> =
        data.attachments
            .iter()
            .map(|attachment| {
                Box::pin(describe_one(describer, attachment, &data.user_prompt, model))
                    as Pin<Box<dyn Future<Output = Result<DescribedImage, String>> + Send + '_>>
            })
            .collect();
    let outcomes: Vec<Result<DescribedImage, String>> = stream::iter(futures)
        .buffered(fanout.max(1))
        .collect()
        .await;

    let mut descriptions = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(described) => descriptions.push(described),
            Err(e) => errors.push(e),
        }
    }

    let failed_count = errors.len();
    let metadata = ImageDescriptionMetadata {
        image_count,
        failed_count,
        processing_time_ms: elapsed_ms(started),
    };

    if descriptions.is_empty() {
        // Total failure: surface the aggregate.
        warn!(request_id = %data.request_id, failed_count, "all images failed description");
        return ImageDescriptionResult {
            success: false,
            descriptions,
            metadata,
            error: Some(errors.join("; ")),
        };
    }

    if failed_count > 0 {
        warn!(request_id = %data.request_id, failed_count, "image job degraded");
    }
    ImageDescriptionResult {
        success: true,
        descriptions,
        metadata,
        error: None,
    }
}

async fn describe_one(
    describer: &dyn VisionDescriber,
    attachment: &Attachment,
    user_prompt: &str,
    model: &str,
) -> Result<DescribedImage, String> {
    let description = with_retry("image-description", RetryPolicy::default(), || {
        describer.describe(&attachment.url, user_prompt, model)
    })
    .await?;
    Ok(DescribedImage {
        url: attachment.url.clone(),
        description,
    })
}

fn elapsed_ms(started: Instant) -> u64 {
    // Floor at 1ms so callers can assert a positive processing time.
    (started.elapsed().as_millis() as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails any URL containing "bad".
    struct SelectiveDescriber;

    #[async_trait]
    impl VisionDescriber for SelectiveDescriber {
        async fn describe(
            &self,
            image_url: &str,
            _user_prompt: &str,
            _model: &str,
        ) -> Result<String, String> {
            if image_url.contains("bad") {
                Err(format!("cannot read {image_url}"))
            } else {
                Ok(format!("a rendering of {image_url}"))
            }
        }
    }

    fn image(name: &str) -> Attachment {
        Attachment {
            url: format!("https://example.com/{name}"),
            name: name.to_string(),
            content_type: "image/png".into(),
            size: 4096,
            is_voice_message: false,
        }
    }

    fn job(attachments: Vec<Attachment>) -> ImageJobData {
        ImageJobData {
            request_id: "req-1".into(),
            attachments,
            model: "gpt-4o".into(),
            vision_model: None,
            user_prompt: "what is this".into(),
        }
    }

    #[tokio::test]
    async fn single_image_succeeds_with_metadata() {
        let result =
            process_image_job(&SelectiveDescriber, &job(vec![image("image1.png")]), 4, "gpt-4o-mini")
                .await;
        assert!(result.success);
        assert_eq!(result.descriptions.len(), 1);
        assert_eq!(result.descriptions[0].url, "https://example.com/image1.png");
        assert_eq!(result.metadata.image_count, 1);
        assert_eq!(result.metadata.failed_count, 0);
        assert!(result.metadata.processing_time_ms > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failure_degrades_gracefully() {
        let result = process_image_job(
            &SelectiveDescriber,
            &job(vec![image("good.png"), image("bad.png")]),
            4,
            "gpt-4o-mini",
        )
        .await;
        assert!(result.success);
        assert_eq!(result.descriptions.len(), 1);
        assert_eq!(result.metadata.failed_count, 1);
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_aggregates_errors() {
        let result = process_image_job(
            &SelectiveDescriber,
            &job(vec![image("bad1.png"), image("bad2.png")]),
            4,
            "gpt-4o-mini",
        )
        .await;
        assert!(!result.success);
        assert!(result.descriptions.is_empty());
        assert_eq!(result.metadata.failed_count, 2);
        let error = result.error.unwrap();
        assert!(error.contains("bad1.png"));
        assert!(error.contains("bad2.png"));
    }

    #[tokio::test]
    async fn non_image_attachment_rejected() {
        let mut bad = image("voice.ogg");
        bad.content_type = "audio/ogg".into();
        let result = process_image_job(&SelectiveDescriber, &job(vec![bad]), 4, "gpt-4o-mini").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid attachment type"));
    }

    #[tokio::test]
    async fn descriptions_preserve_attachment_order() {
        let result = process_image_job(
            &SelectiveDescriber,
            &job(vec![image("a.png"), image("b.png"), image("c.png")]),
            2,
            "gpt-4o-mini",
        )
        .await;
        let urls: Vec<&str> = result.descriptions.iter().map(|d| d.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/a.png",
                "https://example.com/b.png",
                "https://example.com/c.png"
            ]
        );
    }
}
