//! Reasoning-model classification and request adaptation.
//!
//! The classification table is data, not code: a built-in rule set covers
//! the known families, and a TOML file can add rows so new reasoning
//! models ship without a code change.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use reverie_context::types::{PromptMessage, PromptRole};

/// How a model family treats system prompts, temperature, and thinking
/// output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningFamily {
    /// o1/o3 family: no system messages, temperature forbidden.
    OpenaiReasoning,
    /// Extended thinking: temperature forced to 1.0.
    ClaudeExtendedThinking,
    /// May emit `<think>` tags in the output.
    DeepseekR1,
    QwenQwq,
    GlmThinking,
    KimiThinking,
    GenericThinking,
    /// Plain chat model, no adaptation.
    Standard,
}

impl ReasoningFamily {
    pub fn may_emit_think_tags(self) -> bool {
        matches!(
            self,
            ReasoningFamily::DeepseekR1
                | ReasoningFamily::QwenQwq
                | ReasoningFamily::GlmThinking
                | ReasoningFamily::KimiThinking
                | ReasoningFamily::GenericThinking
        )
    }
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleRow>,
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    pattern: String,
    family: ReasoningFamily,
}

struct Rule {
    pattern: Regex,
    family: ReasoningFamily,
}

/// Ordered classification table. First match wins.
pub struct ReasoningRules {
    rules: Vec<Rule>,
}

const BUILTIN_RULES: &[(&str, ReasoningFamily)] = &[
    (r"(?i)\bo[13](-|$|\b)", ReasoningFamily::OpenaiReasoning),
    (r"(?i)deepseek.*r1", ReasoningFamily::DeepseekR1),
    (r"(?i)qwq", ReasoningFamily::QwenQwq),
    (r"(?i)glm.*think", ReasoningFamily::GlmThinking),
    (r"(?i)kimi.*think", ReasoningFamily::KimiThinking),
    (r"(?i)claude.*think", ReasoningFamily::ClaudeExtendedThinking),
    (r"(?i)think", ReasoningFamily::GenericThinking),
];

impl ReasoningRules {
    /// Built-in table only.
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .map(|(pattern, family)| Rule {
                pattern: Regex::new(pattern).expect("builtin reasoning pattern"),
                family: *family,
            })
            .collect();
        Self { rules }
    }

    /// Built-in table with extra rows from a TOML file prepended, so custom
    /// rules win over the defaults. A missing or malformed file falls back
    /// to the built-ins.
    pub fn load(path: Option<&str>) -> Self {
        let mut base = Self::builtin();
        let Some(path) = path else { return base };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path, err = %e, "reasoning rules file unreadable; using builtins");
                return base;
            }
        };
        let file: RuleFile = match toml::from_str(&raw) {
            Ok(file) => file,
            Err(e) => {
                warn!(path, err = %e, "reasoning rules file malformed; using builtins");
                return base;
            }
        };

        let mut rules = Vec::new();
        for row in file.rules {
            match Regex::new(&row.pattern) {
                Ok(pattern) => rules.push(Rule {
                    pattern,
                    family: row.family,
                }),
                Err(e) => warn!(pattern = %row.pattern, err = %e, "bad reasoning rule skipped"),
            }
        }
        rules.append(&mut base.rules);
        Self { rules }
    }

    /// Classify a model name. Unmatched names are `Standard`.
    pub fn classify(&self, model: &str) -> ReasoningFamily {
        for rule in &self.rules {
            if rule.pattern.is_match(model) {
                return rule.family;
            }
        }
        ReasoningFamily::Standard
    }
}

/// Adapt an assembled message list and temperature to the model family.
///
/// OpenAI reasoning models accept no system role: all system content is
/// concatenated and prepended to the first user message inside a
/// `[System Instructions]` envelope, and temperature is dropped entirely.
/// Claude extended thinking pins temperature to 1.0.
pub fn adapt_for_reasoning(
    family: ReasoningFamily,
    messages: Vec<PromptMessage>,
    temperature: Option<f64>,
) -> (Vec<PromptMessage>, Option<f64>) {
    match family {
        ReasoningFamily::OpenaiReasoning => {
            let system_text: Vec<String> = messages
                .iter()
                .filter(|m| m.role == PromptRole::System)
                .map(|m| m.content.clone())
                .collect();
            let mut adapted: Vec<PromptMessage> = messages
                .into_iter()
                .filter(|m| m.role != PromptRole::System)
                .collect();

            if !system_text.is_empty() {
                let envelope = format!(
                    "[System Instructions]\n{}\n[End System Instructions]\n\n",
                    system_text.join("\n\n")
                );
                match adapted.iter_mut().find(|m| m.role == PromptRole::User) {
                    Some(first_user) => {
                        first_user.content = format!("{envelope}{}", first_user.content);
                    }
                    None => adapted.insert(0, PromptMessage::user(envelope)),
                }
            }
            (adapted, None)
        }
        ReasoningFamily::ClaudeExtendedThinking => (messages, Some(1.0)),
        _ => (messages, temperature),
    }
}

static THINKING_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<think(ing)?>.*?</think(ing)?>").expect("thinking tag pattern")
});

/// Remove `<thinking>`/`<think>` blocks (case-insensitive, non-greedy) and
/// trim the remainder.
pub fn strip_thinking_tags(content: &str) -> String {
    THINKING_TAGS.replace_all(content, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_families() {
        let rules = ReasoningRules::builtin();
        assert_eq!(
            rules.classify("openai/o1-preview"),
            ReasoningFamily::OpenaiReasoning
        );
        assert_eq!(rules.classify("o3-mini"), ReasoningFamily::OpenaiReasoning);
        assert_eq!(
            rules.classify("deepseek/deepseek-r1"),
            ReasoningFamily::DeepseekR1
        );
        assert_eq!(rules.classify("qwen/qwq-32b"), ReasoningFamily::QwenQwq);
        assert_eq!(
            rules.classify("glm-4-thinking"),
            ReasoningFamily::GlmThinking
        );
        assert_eq!(
            rules.classify("claude-3-7-thinking"),
            ReasoningFamily::ClaudeExtendedThinking
        );
        assert_eq!(rules.classify("gpt-4o-mini"), ReasoningFamily::Standard);
    }

    #[test]
    fn plain_model_names_do_not_match_o1_rule() {
        let rules = ReasoningRules::builtin();
        assert_eq!(rules.classify("gpt-4o"), ReasoningFamily::Standard);
        assert_eq!(rules.classify("llama-3-70b"), ReasoningFamily::Standard);
    }

    #[test]
    fn openai_reasoning_drops_system_and_temperature() {
        let messages = vec![
            PromptMessage::system("persona stuff"),
            PromptMessage::user("hello"),
            PromptMessage::system("protocol stuff"),
        ];
        let (adapted, temp) =
            adapt_for_reasoning(ReasoningFamily::OpenaiReasoning, messages, Some(0.8));

        assert!(temp.is_none());
        assert!(adapted.iter().all(|m| m.role != PromptRole::System));
        let first_user = adapted
            .iter()
            .find(|m| m.role == PromptRole::User)
            .unwrap();
        assert!(first_user.content.starts_with("[System Instructions]\n"));
        assert!(first_user.content.contains("persona stuff"));
        assert!(first_user.content.contains("protocol stuff"));
        assert!(first_user.content.contains("[End System Instructions]\n\nhello"));
    }

    #[test]
    fn claude_thinking_forces_temperature_one() {
        let (_, temp) = adapt_for_reasoning(
            ReasoningFamily::ClaudeExtendedThinking,
            vec![PromptMessage::user("hi")],
            Some(0.3),
        );
        assert_eq!(temp, Some(1.0));
    }

    #[test]
    fn standard_model_untouched() {
        let messages = vec![PromptMessage::system("s"), PromptMessage::user("u")];
        let (adapted, temp) =
            adapt_for_reasoning(ReasoningFamily::Standard, messages.clone(), Some(0.6));
        assert_eq!(adapted, messages);
        assert_eq!(temp, Some(0.6));
    }

    #[test]
    fn strips_thinking_tags_case_insensitive() {
        assert_eq!(
            strip_thinking_tags("<thinking>draft</thinking>\nFinal answer"),
            "Final answer"
        );
        assert_eq!(
            strip_thinking_tags("<THINK>x</THINK>result"),
            "result"
        );
        assert_eq!(strip_thinking_tags("no tags here"), "no tags here");
    }

    #[test]
    fn strip_is_non_greedy_across_multiple_blocks() {
        let s = "<think>a</think>keep<think>b</think>also";
        assert_eq!(strip_thinking_tags(s), "keepalso");
    }

    #[test]
    fn strip_to_empty_when_only_thinking() {
        assert_eq!(strip_thinking_tags("<think>all of it</think>"), "");
    }

    #[test]
    fn think_tag_families_flagged() {
        assert!(ReasoningFamily::DeepseekR1.may_emit_think_tags());
        assert!(!ReasoningFamily::OpenaiReasoning.may_emit_think_tags());
        assert!(!ReasoningFamily::Standard.may_emit_think_tags());
    }
}
