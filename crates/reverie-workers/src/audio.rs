//! Audio transcription worker: one attachment in, one result out.

use async_trait::async_trait;
use tracing::warn;

use reverie_core::retry::{with_retry, RetryPolicy};
use reverie_core::types::{Attachment, AttachmentKind};
use reverie_jobs::types::{AudioJobData, TranscriptionResult};

/// Seam for the transcription backend so tests inject fakes.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, attachment: &Attachment) -> Result<String, String>;
}

/// HTTP transcription backend posting the attachment URL to a
/// whisper-style endpoint.
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpTranscriber {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, attachment: &Attachment) -> Result<String, String> {
        let url = format!("{}/v1/audio/transcriptions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "url": attachment.url,
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
            return Err(format!("transcription failed ({status}): {text}"));
        }
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        value
            .get("text")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| "transcription response missing text".to_string())
    }
}

/// Process one audio-transcription job. The transcription call is retried;
/// a non-audio attachment fails immediately with the classifier error.
pub async fn process_audio_job(
    transcriber: &dyn Transcriber,
    data: &AudioJobData,
) -> TranscriptionResult {
    if data.attachment.kind() != Some(AttachmentKind::Audio) {
        return TranscriptionResult {
            success: false,
            content: None,
            error: Some("Invalid attachment type".to_string()),
        };
    }

    let outcome = with_retry("audio-transcription", RetryPolicy::default(), || {
        transcriber.transcribe(&data.attachment)
    })
    .await;

    match outcome {
        Ok(content) => TranscriptionResult {
            success: true,
            content: Some(content),
            error: None,
        },
        Err(e) => {
            warn!(request_id = %data.request_id, err = %e, "audio transcription exhausted retries");
            TranscriptionResult {
                success: false,
                content: None,
                error: Some(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyTranscriber {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, _attachment: &Attachment) -> Result<String, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err("transient".to_string())
            } else {
                Ok("good morning".to_string())
            }
        }
    }

    fn audio_job(content_type: &str) -> AudioJobData {
        AudioJobData {
            request_id: "req-1".into(),
            attachment: Attachment {
                url: "https://example.com/voice.ogg".into(),
                name: "voice.ogg".into(),
                content_type: content_type.into(),
                size: 2048,
                is_voice_message: true,
            },
            attachment_index: 0,
        }
    }

    #[tokio::test]
    async fn transcribes_audio_attachment() {
        let t = FlakyTranscriber {
            fail_first: 0,
            calls: AtomicU32::new(0),
        };
        let result = process_audio_job(&t, &audio_job("audio/ogg")).await;
        assert!(result.success);
        assert_eq!(result.content.as_deref(), Some("good morning"));
    }

    #[tokio::test]
    async fn rejects_non_audio_content_type() {
        let t = FlakyTranscriber {
            fail_first: 0,
            calls: AtomicU32::new(0),
        };
        let result = process_audio_job(&t, &audio_job("image/png")).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Invalid attachment type"));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let t = FlakyTranscriber {
            fail_first: 2,
            calls: AtomicU32::new(0),
        };
        let result = process_audio_job(&t, &audio_job("audio/mpeg")).await;
        assert!(result.success);
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_error() {
        let t = FlakyTranscriber {
            fail_first: 10,
            calls: AtomicU32::new(0),
        };
        let result = process_audio_job(&t, &audio_job("audio/ogg")).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
    }
}
