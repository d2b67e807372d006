use serde::{Deserialize, Serialize};

/// A single user submission, immutable once accepted and enqueued.
///
/// The `request_id` is generated at acceptance; every job spawned for this
/// request derives its id from it, so duplicate queue consumption is
/// content-addressed and harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub request_id: String,
    pub user_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub personality: Personality,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub referenced_messages: Vec<ReferencedMessage>,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub prior_conversations: Vec<PriorChannelGroup>,
    /// Caller-supplied key overriding the service key for this request only.
    #[serde(default)]
    pub user_api_key: Option<String>,
    pub response_destination: String,
}

/// A message the user replied to, threaded into the prompt as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencedMessage {
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// One turn of conversation history supplied with the request,
/// oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub author_name: String,
    #[serde(default)]
    pub is_assistant: bool,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Message inside a prior-conversation group from another channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorChannelMessage {
    pub author_name: String,
    pub content: String,
}

/// Conversation fetched from another channel, most recent channel first,
/// messages chronological within the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorChannelGroup {
    /// Human-readable location ("#general on Example Server").
    pub channel_environment: String,
    pub messages: Vec<PriorChannelMessage>,
}

/// File attached to a request. Classified by content-type prefix; anything
/// that is neither image nor audio is rejected at planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub name: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default)]
    pub is_voice_message: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Audio,
}

impl AttachmentKind {
    /// Classify by content-type prefix. Returns `None` for unsupported types.
    pub fn classify(content_type: &str) -> Option<Self> {
        if content_type.starts_with("image/") {
            Some(AttachmentKind::Image)
        } else if content_type.starts_with("audio/") {
            Some(AttachmentKind::Audio)
        } else {
            None
        }
    }
}

impl Attachment {
    pub fn kind(&self) -> Option<AttachmentKind> {
        AttachmentKind::classify(&self.content_type)
    }
}

/// Behaviour rules of a personality. Legacy bundles carry a single markup
/// string; newer ones a structured object with three rule arrays.
///
/// The protocol is emitted at the END of the prompt, never inside the
/// persona sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Protocol {
    #[serde(rename_all = "camelCase")]
    Structured {
        #[serde(default)]
        permissions: Vec<String>,
        #[serde(default)]
        directives: Vec<String>,
        #[serde(default)]
        formatting_rules: Vec<String>,
    },
    Legacy(String),
}

impl Protocol {
    /// Render the protocol block as plain text for the prompt tail.
    pub fn render(&self) -> String {
        match self {
            Protocol::Legacy(text) => text.clone(),
            Protocol::Structured {
                permissions,
                directives,
                formatting_rules,
            } => {
                let mut out = String::new();
                for (title, rules) in [
                    ("Permissions", permissions),
                    ("Directives", directives),
                    ("Formatting", formatting_rules),
                ] {
                    if rules.is_empty() {
                        continue;
                    }
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(&format!("## {title}\n"));
                    for rule in rules {
                        out.push_str(&format!("- {rule}\n"));
                    }
                }
                out
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Protocol::Legacy(text) => text.trim().is_empty(),
            Protocol::Structured {
                permissions,
                directives,
                formatting_rules,
            } => permissions.is_empty() && directives.is_empty() && formatting_rules.is_empty(),
        }
    }
}

/// A loaded personality bundle: descriptive persona fields plus the
/// behaviour protocol and per-personality LLM parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub traits: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub age: Option<String>,
    #[serde(default)]
    pub appearance: Option<String>,
    #[serde(default)]
    pub likes: Option<String>,
    #[serde(default)]
    pub dislikes: Option<String>,
    #[serde(default)]
    pub goals: Option<String>,
    #[serde(default)]
    pub examples: Option<String>,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    pub model: String,
    /// Total prompt budget in tokens. Must be positive.
    pub context_window_tokens: u32,
    pub temperature: f64,
    pub max_tokens: u32,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default)]
    pub params: LlmParams,
}

impl Personality {
    /// Structural validation applied before any job is planned.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::ReverieError::Validation(
                "personality name is required".to_string(),
            ));
        }
        if self.context_window_tokens == 0 {
            return Err(crate::error::ReverieError::Validation(
                "contextWindowTokens must be positive".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(crate::error::ReverieError::Validation(
                "maxTokens must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(crate::error::ReverieError::Validation(format!(
                "temperature {} out of range 0..2",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Extended sampling parameters. Every field is optional; `None` means
/// "inherit from the next tier down" during cascade resolution.
///
/// This struct doubles as the whitelist for override merging: unknown JSON
/// fields are rejected at the resolver boundary, not stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_a: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logit_bias: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transforms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
}

impl LlmParams {
    /// Overlay `self` on top of `base`: fields set here win, `None` falls
    /// through to `base`. Used by the cascade resolver, first match wins.
    pub fn merged_over(&self, base: &LlmParams) -> LlmParams {
        LlmParams {
            temperature: self.temperature.or(base.temperature),
            max_tokens: self.max_tokens.or(base.max_tokens),
            top_p: self.top_p.or(base.top_p),
            top_k: self.top_k.or(base.top_k),
            frequency_penalty: self.frequency_penalty.or(base.frequency_penalty),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            repetition_penalty: self.repetition_penalty.or(base.repetition_penalty),
            min_p: self.min_p.or(base.min_p),
            top_a: self.top_a.or(base.top_a),
            seed: self.seed.or(base.seed),
            stop: self.stop.clone().or_else(|| base.stop.clone()),
            logit_bias: self.logit_bias.clone().or_else(|| base.logit_bias.clone()),
            response_format: self
                .response_format
                .clone()
                .or_else(|| base.response_format.clone()),
            reasoning: self.reasoning.clone().or_else(|| base.reasoning.clone()),
            transforms: self.transforms.clone().or_else(|| base.transforms.clone()),
            route: self.route.clone().or_else(|| base.route.clone()),
            verbosity: self.verbosity.clone().or_else(|| base.verbosity.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == LlmParams::default()
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// What a job does. One generation job per request; zero or more
/// preprocessing jobs feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    AudioTranscription,
    ImageDescription,
    ShapesImport,
    LlmGeneration,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::AudioTranscription => "audio-transcription",
            JobKind::ImageDescription => "image-description",
            JobKind::ShapesImport => "shapes-import",
            JobKind::LlmGeneration => "llm-generation",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio-transcription" => Ok(JobKind::AudioTranscription),
            "image-description" => Ok(JobKind::ImageDescription),
            "shapes-import" => Ok(JobKind::ShapesImport),
            "llm-generation" => Ok(JobKind::LlmGeneration),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Job lifecycle. Transitions are strictly forward:
/// queued → active → {completed | failed} → delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Delivered,
}

impl JobState {
    /// Whether moving to `next` is a legal forward edge.
    pub fn can_transition(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
                | (JobState::Completed, JobState::Delivered)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delivered => "delivered",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delivered" => Ok(JobState::Delivered),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Edge in the per-request dependency graph. The generation worker fetches
/// each dependency's output from the result store under `result_key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDependency {
    pub job_id: String,
    pub result_key: String,
    pub kind: JobKind,
}

/// A unit of queued work. `data` carries the kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub data: serde_json::Value,
    #[serde(default)]
    pub dependencies: Vec<JobDependency>,
    pub state: JobState,
}
