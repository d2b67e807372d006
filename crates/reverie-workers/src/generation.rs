//! The generation job lifecycle.
//!
//! Dependency results are awaited and merged, config resolved, the prompt
//! assembled, the model invoked with empty/duplicate validation, the turn
//! persisted through the memory outbox, and the result written for
//! delivery. Failures are logged with request context and written as
//! failure results — nothing is thrown past the job boundary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, warn};

use reverie_context::assembler::{assemble, AssembleInput};
use reverie_context::format::{format_user_message, wrap_speaker};
use reverie_context::mentions::resolve_mentions;
use reverie_core::types::{GenerationRequest, Job, JobDependency, JobKind};
use reverie_embedding::Embedder;
use reverie_jobs::types::{
    GenerationJobData, ImageDescriptionResult, LlmGenerationResult, TranscriptionResult,
};
use reverie_jobs::{JobRepo, ResultStore};
use reverie_memory::{CanonScope, MemoryQuery, MemoryStore, NewMemory, UserDirectory};
use reverie_settings::{LlmConfigResolver, PersonaResolver};

use crate::duplicate::RecentOutputs;
use crate::provider::{ChatRequest, LlmProvider};
use crate::reasoning::{adapt_for_reasoning, strip_thinking_tags, ReasoningRules};

/// Total attempts for empty/duplicate output before the job fails.
const MAX_GENERATION_ATTEMPTS: u32 = 3;
/// Dependency poll cadence while waiting for preprocessing results.
const DEPENDENCY_POLL_MS: u64 = 500;

pub struct GenerationWorker {
    provider: Arc<dyn LlmProvider>,
    embedder: Arc<dyn Embedder>,
    memory: Arc<MemoryStore>,
    settings: Arc<LlmConfigResolver>,
    results: Arc<dyn ResultStore>,
    repo: Arc<JobRepo>,
    directory: Arc<dyn UserDirectory>,
    personas: Arc<PersonaResolver>,
    reasoning: ReasoningRules,
    recent: RecentOutputs,
    dependency_wait: Duration,
}

impl GenerationWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        memory: Arc<MemoryStore>,
        settings: Arc<LlmConfigResolver>,
        results: Arc<dyn ResultStore>,
        repo: Arc<JobRepo>,
        directory: Arc<dyn UserDirectory>,
        personas: Arc<PersonaResolver>,
        reasoning: ReasoningRules,
        dependency_wait: Duration,
    ) -> Self {
        Self {
            provider,
            embedder,
            memory,
            settings,
            results,
            repo,
            directory,
            personas,
            reasoning,
            recent: RecentOutputs::new(),
            dependency_wait,
        }
    }

    /// Run one generation job end to end and write its result.
    pub async fn run(&self, job: &Job) -> LlmGenerationResult {
        let data: GenerationJobData = match serde_json::from_value(job.data.clone()) {
            Ok(data) => data,
            Err(e) => {
                error!(job_id = %job.id, err = %e, "generation job payload unreadable");
                let result = failure_result("unknown", &format!("bad job payload: {e}"));
                self.write_result(&job.id, "unknown", &result).await;
                return result;
            }
        };
        let request = &data.request;

        // 1. Await dependencies; missing or failed results degrade rather
        //    than fail the job.
        let outputs = self.await_dependencies(&job.dependencies).await;

        // 2. Merge preprocessing outputs into one descriptions string.
        let attachment_descriptions = merge_preprocessing(&request.request_id, &outputs);

        let result = self
            .generate(request, &attachment_descriptions)
            .await
            .unwrap_or_else(|e| {
                error!(
                    request_id = %request.request_id,
                    job_id = %job.id,
                    err = %e,
                    "generation failed"
                );
                failure_result(&request.request_id, &e)
            });

        self.write_result(&job.id, &request.request_id, &result).await;
        result
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        attachment_descriptions: &str,
    ) -> Result<LlmGenerationResult, String> {
        let personality = &request.personality;

        // 3. Resolve effective LLM params through the cascade.
        let resolved = self
            .settings
            .resolve(
                &request.user_id,
                &personality.name,
                request.channel_id.as_deref(),
            )
            .await
            .map_err(|e| format!("config resolution failed: {e}"))?;
        let effective = resolved.params.merged_over(&personality.params);
        let temperature = effective.temperature.unwrap_or(personality.temperature);
        let max_tokens = effective.max_tokens.unwrap_or(personality.max_tokens);

        // 4. Retrieve memories: channel-scoped first, then the broad query
        //    with the waterfall exclude-list.
        let memories = self.retrieve_memories(request).await;

        // 5. Resolve the speaking persona (switch semantics: an override
        //    replaces the default wholesale), then mentions, preprocessing
        //    output, and the speaker wrap.
        let speaker = self
            .personas
            .resolve(&request.user_id, &personality.name)
            .await
            .unwrap_or_else(|e| {
                warn!(err = %e, "persona resolution failed; using raw user id");
                None
            });
        let persona_id = speaker
            .as_ref()
            .map(|s| s.persona_id.clone())
            .unwrap_or_else(|| request.user_id.clone());
        let resolved_text = resolve_mentions(&request.message, self.directory.as_ref(), &persona_id)
            .await
            .text;
        let body = format_user_message(&resolved_text, attachment_descriptions);
        let (persona_name, username) = speaker
            .map(|s| (s.persona_name, s.username))
            .unwrap_or_else(|| (request.user_id.clone(), request.user_id.clone()));
        let current_message = wrap_speaker(
            &persona_id,
            &persona_name,
            &username,
            &personality.name,
            &body,
        );

        // 6. Assemble the prompt under the token budget.
        let prompt = assemble(&AssembleInput {
            personality,
            current_message,
            history: &request.conversation_history,
            memories: &memories,
            cross_channel: &request.prior_conversations,
            referenced_messages: &request.referenced_messages,
        });

        // 7. Reasoning-model adaptation.
        let family = self.reasoning.classify(&personality.model);
        let (messages, temperature) =
            adapt_for_reasoning(family, prompt.messages, Some(temperature));

        let chat = ChatRequest {
            model: personality.model.clone(),
            messages,
            temperature,
            max_tokens,
            params: effective,
            api_key_override: request.user_api_key.clone(),
        };

        // 8. Invoke with empty/duplicate validation, bounded attempts.
        let content = self.invoke_validated(&chat, &request.user_id).await?;

        // 9. Persist the turn through the outbox. Failure never blocks the
        //    result; the outbox sweeper retries later.
        self.persist_turn(request, &persona_name, &content).await;

        Ok(LlmGenerationResult {
            request_id: request.request_id.clone(),
            success: true,
            content: Some(content),
            attachment_descriptions: some_if_nonempty(attachment_descriptions),
            referenced_messages_descriptions: render_referenced_summary(request),
            error: None,
            metadata: json!({
                "model": personality.model,
                "source": resolved.source,
                "tokens": prompt.stats.total_tokens,
                "messagesIncluded": prompt.stats.messages_included,
                "messagesDropped": prompt.stats.messages_dropped,
            }),
        })
    }

    /// Poll the keyed store for every dependency until found or the wait
    /// budget runs out.
    async fn await_dependencies(
        &self,
        dependencies: &[JobDependency],
    ) -> Vec<(JobKind, serde_json::Value)> {
        let deadline = tokio::time::Instant::now() + self.dependency_wait;
        let mut outputs: Vec<(JobKind, serde_json::Value)> = Vec::new();
        let mut remaining: Vec<&JobDependency> = dependencies.iter().collect();

        while !remaining.is_empty() && tokio::time::Instant::now() < deadline {
            let mut still_missing = Vec::new();
            for dep in remaining {
                match self.results.get(&dep.result_key).await {
                    Ok(Some(value)) => outputs.push((dep.kind, value)),
                    Ok(None) => still_missing.push(dep),
                    Err(e) => {
                        warn!(result_key = %dep.result_key, err = %e, "dependency fetch failed");
                        still_missing.push(dep);
                    }
                }
            }
            remaining = still_missing;
            if !remaining.is_empty() {
                tokio::time::sleep(Duration::from_millis(DEPENDENCY_POLL_MS)).await;
            }
        }

        for dep in &remaining {
            warn!(
                job_id = %dep.job_id,
                result_key = %dep.result_key,
                "dependency missing after wait; omitting from prompt"
            );
        }
        outputs
    }

    /// Channel-scoped query first, then the broad query excluding what the
    /// first pass already returned.
    async fn retrieve_memories(
        &self,
        request: &GenerationRequest,
    ) -> Vec<reverie_memory::RetrievedMemory> {
        let horizon = request
            .conversation_history
            .first()
            .and_then(|turn| turn.timestamp);

        let mut scopes = vec![CanonScope::Global, CanonScope::Personal];
        if request.session_id.is_some() {
            scopes.push(CanonScope::Session);
        }

        let mut base = MemoryQuery::new(request.user_id.clone());
        base.personality_id = Some(request.personality.name.clone());
        base.exclude_newer_than = horizon;
        base.scopes = scopes;
        base.session_id = request.session_id.clone();

        let mut collected = Vec::new();

        if let Some(channel_id) = &request.channel_id {
            let mut channel_query = base.clone();
            channel_query.channel_ids = vec![channel_id.clone()];
            match self.memory.query(&request.message, &channel_query).await {
                Ok(hits) => collected.extend(hits),
                Err(e) => warn!(err = %e, "channel-scoped memory query failed"),
            }
        }

        let mut broad = base;
        broad.exclude_ids = collected.iter().map(|m| m.id).collect();
        match self.memory.query(&request.message, &broad).await {
            Ok(hits) => collected.extend(hits),
            Err(e) => warn!(err = %e, "memory query failed"),
        }
        collected
    }

    /// Up to three attempts; empty-after-strip and near-duplicate outputs
    /// are rejected and retried.
    async fn invoke_validated(&self, chat: &ChatRequest, user_id: &str) -> Result<String, String> {
        let mut last_rejection = String::new();

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let response = match self.provider.chat(chat).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, err = %e, "provider call failed");
                    last_rejection = e.to_string();
                    if attempt < MAX_GENERATION_ATTEMPTS {
                        tokio::time::sleep(
                            reverie_core::retry::RetryPolicy::default().delay_for_attempt(attempt),
                        )
                        .await;
                    }
                    continue;
                }
            };

            let content = strip_thinking_tags(&response.content);
            if content.is_empty() {
                warn!(attempt, "empty content after thinking-tag strip; retrying");
                last_rejection = "model returned empty content".to_string();
                continue;
            }

            // Duplicate detection degrades open: no embedding, no check.
            if let Some(embedding) = self.embedder.embed(&content).await {
                if self.recent.is_duplicate(user_id, &embedding) {
                    warn!(attempt, "near-duplicate output; retrying");
                    last_rejection = "model repeated a recent response".to_string();
                    continue;
                }
                self.recent.record(user_id, embedding);
            }

            return Ok(content);
        }

        Err(format!(
            "generation failed after {MAX_GENERATION_ATTEMPTS} attempts: {last_rejection}"
        ))
    }

    /// Compose and store the turn memory through the outbox protocol.
    async fn persist_turn(&self, request: &GenerationRequest, persona_name: &str, content: &str) {
        let turn_text = format!(
            "{persona_name}: {}\n{}: {content}",
            request.message, request.personality.name
        );
        let memory = NewMemory {
            persona_id: request.user_id.clone(),
            personality_id: request.personality.name.clone(),
            content: turn_text,
            canon_scope: if request.session_id.is_some() {
                CanonScope::Session
            } else {
                CanonScope::Personal
            },
            summary_type: if request.channel_id.is_none() {
                "dm".to_string()
            } else {
                "conversation".to_string()
            },
            channel_id: request.channel_id.clone(),
            guild_id: request.guild_id.clone(),
            session_id: request.session_id.clone(),
            senders: vec![request.user_id.clone()],
            message_ids: Vec::new(),
            chunk: None,
        };

        if let Err(e) = self.memory.remember(&memory).await {
            warn!(
                request_id = %request.request_id,
                err = %e,
                "turn memory write failed; outbox will retry"
            );
        }
    }

    /// Step 9: keyed store + delivery table + result stream.
    async fn write_result(&self, job_id: &str, request_id: &str, result: &LlmGenerationResult) {
        let body = match serde_json::to_value(result) {
            Ok(body) => body,
            Err(e) => {
                error!(job_id, err = %e, "result serialization failed");
                return;
            }
        };
        if let Err(e) = self.results.put(job_id, &body).await {
            error!(job_id, err = %e, "result store write failed");
        }
        if let Err(e) = self.repo.record_result(job_id, request_id, &body).await {
            error!(job_id, err = %e, "result row write failed");
        }
        if let Err(e) = self.results.append_result_stream(job_id, &body).await {
            error!(job_id, err = %e, "result stream append failed");
        }
        info!(job_id, request_id, success = result.success, "generation result written");
    }
}

/// Fold transcripts and image descriptions into one block for the prompt.
fn merge_preprocessing(request_id: &str, outputs: &[(JobKind, serde_json::Value)]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for (kind, value) in outputs {
        match kind {
            JobKind::AudioTranscription => {
                match serde_json::from_value::<TranscriptionResult>(value.clone()) {
                    Ok(result) if result.success => {
                        if let Some(content) = result.content {
                            parts.push(format!("[Audio transcript]: {content}"));
                        }
                    }
                    Ok(result) => warn!(
                        request_id,
                        err = result.error.as_deref().unwrap_or("unknown"),
                        "transcription dependency failed; omitting"
                    ),
                    Err(e) => warn!(request_id, err = %e, "unreadable transcription result"),
                }
            }
            JobKind::ImageDescription => {
                match serde_json::from_value::<ImageDescriptionResult>(value.clone()) {
                    Ok(result) if result.success => {
                        for described in result.descriptions {
                            parts.push(format!(
                                "[Image: {}] {}",
                                described.url, described.description
                            ));
                        }
                    }
                    Ok(result) => warn!(
                        request_id,
                        err = result.error.as_deref().unwrap_or("unknown"),
                        "image dependency failed; omitting"
                    ),
                    Err(e) => warn!(request_id, err = %e, "unreadable image result"),
                }
            }
            _ => {}
        }
    }

    parts.join("\n")
}

fn render_referenced_summary(request: &GenerationRequest) -> Option<String> {
    if request.referenced_messages.is_empty() {
        return None;
    }
    Some(
        request
            .referenced_messages
            .iter()
            .map(|m| format!("{}: {}", m.author, m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn failure_result(request_id: &str, error: &str) -> LlmGenerationResult {
    LlmGenerationResult {
        request_id: request_id.to_string(),
        success: false,
        content: None,
        attachment_descriptions: None,
        referenced_messages_descriptions: None,
        error: Some(error.to_string()),
        metadata: json!({}),
    }
}

fn some_if_nonempty(s: &str) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_combines_transcripts_and_descriptions() {
        let outputs = vec![
            (
                JobKind::AudioTranscription,
                json!({"success": true, "content": "hello there"}),
            ),
            (
                JobKind::ImageDescription,
                json!({
                    "success": true,
                    "descriptions": [
                        {"url": "https://example.com/a.png", "description": "a red fox"}
                    ],
                    "metadata": {"imageCount": 1, "failedCount": 0, "processingTimeMs": 5}
                }),
            ),
        ];
        let merged = merge_preprocessing("req-1", &outputs);
        assert!(merged.contains("[Audio transcript]: hello there"));
        assert!(merged.contains("[Image: https://example.com/a.png] a red fox"));
    }

    #[test]
    fn merge_omits_failed_dependencies() {
        let outputs = vec![(
            JobKind::AudioTranscription,
            json!({"success": false, "error": "decode failed"}),
        )];
        assert_eq!(merge_preprocessing("req-1", &outputs), "");
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert_eq!(merge_preprocessing("req-1", &[]), "");
    }

    #[test]
    fn failure_result_has_error_and_no_content() {
        let r = failure_result("req-9", "boom");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.content.is_none());
    }
}
