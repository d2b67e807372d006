//! HTTP wrapper around the chat-completions API.
//!
//! Two behaviours beyond a plain client:
//!   - the response body is read once and kept, so a parse failure still
//!     has the original text for logging;
//!   - a 4xx whose error body still carries a valid
//!     `choices[0].message.content` is recovered into a success — some
//!     providers fail a request after generating usable output.
//!
//! `message.reasoning` is merged into the content: reasoning alone becomes
//! the content, reasoning alongside content is prepended in
//! `<reasoning>…</reasoning>` tags.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use reverie_core::types::LlmParams;
use reverie_context::types::{PromptMessage, PromptRole};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// Request to the model, already reasoning-adapted.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
    /// `None` when the reasoning family forbids temperature.
    pub temperature: Option<f64>,
    pub max_tokens: u32,
    pub params: LlmParams,
    /// Caller-supplied key overriding the service key.
    pub api_key_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    /// True when the content was salvaged from a 4xx error body.
    pub recovered_from_error: bool,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let key = req.api_key_override.as_deref().unwrap_or(&self.api_key);

        debug!(model = %req.model, "sending chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        // Read the body once; every later step works on this copy.
        let raw = resp.text().await.unwrap_or_default();

        if (400..500).contains(&status) {
            // Partial provider failure: a 4xx that still carries content is
            // synthesized into a success.
            if let Some(content) = extract_content(&raw) {
                warn!(status, "4xx carried valid content; recovering");
                return Ok(ChatResponse {
                    content,
                    model: req.model.clone(),
                    recovered_from_error: true,
                });
            }
            return Err(ProviderError::Api {
                status,
                message: raw,
            });
        }
        if status >= 500 {
            warn!(status, body = %raw, "provider 5xx");
            return Err(ProviderError::Api {
                status,
                message: raw,
            });
        }

        match extract_content(&raw) {
            Some(content) => Ok(ChatResponse {
                content,
                model: req.model.clone(),
                recovered_from_error: false,
            }),
            None => {
                warn!(body = %raw, "unparseable success response");
                Err(ProviderError::Parse(
                    "response missing choices[0].message.content".to_string(),
                ))
            }
        }
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<WireMessage<'_>> = req
        .messages
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                PromptRole::System => "system",
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            },
            content: &m.content,
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });
    if let Some(t) = req.temperature {
        body["temperature"] = serde_json::json!(t);
    }

    // Extended sampling params ride along only when set.
    let p = &req.params;
    for (key, value) in [
        ("top_p", p.top_p.map(|v| serde_json::json!(v))),
        ("top_k", p.top_k.map(|v| serde_json::json!(v))),
        (
            "frequency_penalty",
            p.frequency_penalty.map(|v| serde_json::json!(v)),
        ),
        (
            "presence_penalty",
            p.presence_penalty.map(|v| serde_json::json!(v)),
        ),
        (
            "repetition_penalty",
            p.repetition_penalty.map(|v| serde_json::json!(v)),
        ),
        ("min_p", p.min_p.map(|v| serde_json::json!(v))),
        ("top_a", p.top_a.map(|v| serde_json::json!(v))),
        ("seed", p.seed.map(|v| serde_json::json!(v))),
        ("stop", p.stop.as_ref().map(|v| serde_json::json!(v))),
        ("logit_bias", p.logit_bias.clone()),
        ("response_format", p.response_format.clone()),
        ("reasoning", p.reasoning.clone()),
        ("transforms", p.transforms.as_ref().map(|v| serde_json::json!(v))),
        ("route", p.route.as_ref().map(|v| serde_json::json!(v))),
        ("verbosity", p.verbosity.as_ref().map(|v| serde_json::json!(v))),
    ] {
        if let Some(value) = value {
            body[key] = value;
        }
    }
    body
}

/// Pull `choices[0].message` out of a raw body and merge reasoning into the
/// content. Returns `None` when the shape is wrong or both fields are
/// empty.
pub(crate) fn extract_content(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    let message = value.get("choices")?.get(0)?.get("message")?;
    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let reasoning = message
        .get("reasoning")
        .and_then(|r| r.as_str())
        .filter(|r| !r.trim().is_empty());

    let merged = merge_reasoning(content, reasoning);
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Reasoning-merge rules: reasoning alone IS the content (no tags); both
/// present prepends a `<reasoning>` block.
pub(crate) fn merge_reasoning(content: &str, reasoning: Option<&str>) -> String {
    match (content.is_empty(), reasoning) {
        (true, Some(r)) => r.to_string(),
        (false, Some(r)) => format!("<reasoning>{r}</reasoning>\n{content}"),
        (_, None) => content.to_string(),
    }
}
