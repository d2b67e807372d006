//! Prompt assembly under a token budget.
//!
//! The final ordering is U-shaped, with high-salience content at both ends
//! of the window: persona first, behaviour protocol last, and the bulk of
//! conversation history in the middle. History fills whatever budget is
//! left after the measured fixed parts; selection is recency-first.

use tracing::debug;

use reverie_core::types::{Personality, ReferencedMessage};
use reverie_memory::RetrievedMemory;

use crate::crosschannel::pack_cross_channel;
use crate::memories::render_memories;
use crate::tokens::count_text_tokens;
use crate::types::{CrossChannelGroup, HistoryMessage, PromptMessage};

/// Share of the context window the memory block may occupy.
pub const MEMORY_BUDGET_FRACTION: f64 = 0.15;
/// Share of the history budget offered to cross-channel groups.
const CROSS_CHANNEL_FRACTION: f64 = 0.25;
/// Headroom kept free for role scaffolding and tokenizer drift.
const SAFETY_MARGIN_TOKENS: usize = 128;

pub struct AssembleInput<'a> {
    pub personality: &'a Personality,
    /// Current user message, already formatted and speaker-wrapped.
    pub current_message: String,
    /// Oldest → newest.
    pub history: &'a [HistoryMessage],
    /// Cosine-ranked, best first.
    pub memories: &'a [RetrievedMemory],
    /// Most recent channel first.
    pub cross_channel: &'a [CrossChannelGroup],
    pub referenced_messages: &'a [ReferencedMessage],
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssemblyStats {
    pub context_window_tokens: u32,
    pub total_tokens: usize,
    pub history_budget: usize,
    pub messages_included: usize,
    pub messages_dropped: usize,
    pub memories_included: usize,
    pub cross_channel_groups: usize,
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<PromptMessage>,
    pub stats: AssemblyStats,
}

/// Build the ordered message list for one generation call.
pub fn assemble(input: &AssembleInput<'_>) -> AssembledPrompt {
    let window = input.personality.context_window_tokens as usize;

    // Fixed ends of the U: persona head and protocol tail, both measured.
    let persona_block = render_persona(input.personality);
    let protocol_block = input
        .personality
        .protocol
        .as_ref()
        .filter(|p| !p.is_empty())
        .map(|p| p.render())
        .unwrap_or_default();

    let persona_tokens = count_text_tokens(&persona_block);
    let protocol_tokens = count_text_tokens(&protocol_block);
    let current_tokens = count_text_tokens(&input.current_message);

    let reserved = persona_tokens + protocol_tokens + current_tokens + SAFETY_MARGIN_TOKENS;
    let remaining = window.saturating_sub(reserved);

    // Memories: ranked list packed under a capped share of the window.
    let memory_cap = ((window as f64) * MEMORY_BUDGET_FRACTION) as usize;
    let (memory_block, memories_included) =
        render_memories(input.memories, memory_cap.min(remaining));
    let memory_tokens = count_text_tokens(&memory_block);

    // Referenced messages come out of the shared remainder as well.
    let referenced_block = render_referenced(input.referenced_messages);
    let referenced_tokens = count_text_tokens(&referenced_block);

    let history_budget = remaining.saturating_sub(memory_tokens + referenced_tokens);

    // Cross-channel history gets a bounded slice of the history budget.
    let cross_budget = ((history_budget as f64) * CROSS_CHANNEL_FRACTION) as usize;
    let packed = pack_cross_channel(input.cross_channel, cross_budget);
    let cross_tokens = count_text_tokens(&packed.block);

    // Recency-first selection: walk newest → oldest until the next message
    // would overflow, then emit the survivors oldest → newest.
    let mut selection_budget = history_budget.saturating_sub(cross_tokens);
    let mut selected: Vec<&HistoryMessage> = Vec::new();
    for message in input.history.iter().rev() {
        let cost = count_text_tokens(&render_history_line(message)) + 1;
        if cost > selection_budget {
            break;
        }
        selection_budget -= cost;
        selected.push(message);
    }
    selected.reverse();
    let messages_included = selected.len();
    let messages_dropped = input.history.len() - messages_included;

    // Emit in U order.
    let mut messages = Vec::new();
    let head = if memory_block.is_empty() {
        persona_block
    } else {
        format!("{persona_block}\n\n{memory_block}")
    };
    messages.push(PromptMessage::system(head));

    if !packed.block.is_empty() {
        messages.push(PromptMessage::system(packed.block.clone()));
    }
    for message in selected {
        if message.is_assistant {
            messages.push(PromptMessage::assistant(message.content.clone()));
        } else {
            messages.push(PromptMessage::user(render_history_line(message)));
        }
    }
    if !referenced_block.is_empty() {
        messages.push(PromptMessage::system(referenced_block));
    }
    messages.push(PromptMessage::user(input.current_message.clone()));
    if !protocol_block.is_empty() {
        messages.push(PromptMessage::system(protocol_block));
    }

    let total_tokens: usize = messages.iter().map(|m| count_text_tokens(&m.content)).sum();
    let stats = AssemblyStats {
        context_window_tokens: input.personality.context_window_tokens,
        total_tokens,
        history_budget,
        messages_included,
        messages_dropped,
        memories_included,
        cross_channel_groups: packed.groups_included,
    };
    debug!(
        total_tokens,
        history_budget,
        messages_included,
        messages_dropped,
        "prompt assembled"
    );

    AssembledPrompt { messages, stats }
}

/// Identity and character fields in named sections. The protocol is never
/// part of this block — it closes the prompt instead.
fn render_persona(personality: &Personality) -> String {
    let mut out = format!("# You are {}", personality.name);
    for (title, value) in [
        ("Character", &personality.character),
        ("Traits", &personality.traits),
        ("Tone", &personality.tone),
        ("Age", &personality.age),
        ("Appearance", &personality.appearance),
        ("Likes", &personality.likes),
        ("Dislikes", &personality.dislikes),
        ("Goals", &personality.goals),
        ("Examples", &personality.examples),
    ] {
        if let Some(value) = value {
            if !value.trim().is_empty() {
                out.push_str(&format!("\n\n## {title}\n{value}"));
            }
        }
    }
    out
}

fn render_referenced(referenced: &[ReferencedMessage]) -> String {
    if referenced.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Referenced Messages");
    for message in referenced {
        match message.timestamp {
            Some(ts) => out.push_str(&format!(
                "\n- [{}] {}: {}",
                ts.format("%Y-%m-%d %H:%M UTC"),
                message.author,
                message.content
            )),
            None => out.push_str(&format!("\n- {}: {}", message.author, message.content)),
        }
    }
    out
}

fn render_history_line(message: &HistoryMessage) -> String {
    if message.is_assistant {
        message.content.clone()
    } else {
        format!("{}: {}", message.author_name, message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrossChannelMessage, PromptRole};
    use reverie_core::types::{LlmParams, Protocol};
    use reverie_memory::CanonScope;
    use uuid::Uuid;

    fn personality(window: u32) -> Personality {
        Personality {
            name: "Luna".into(),
            character: Some("A thoughtful lunar spirit.".into()),
            traits: Some("curious, gentle".into()),
            tone: Some("warm".into()),
            age: None,
            appearance: None,
            likes: Some("stargazing".into()),
            dislikes: None,
            goals: None,
            examples: None,
            protocol: Some(Protocol::Structured {
                permissions: vec![],
                directives: vec!["always stay in character".into()],
                formatting_rules: vec!["plain prose only".into()],
            }),
            model: "gpt-4o-mini".into(),
            context_window_tokens: window,
            temperature: 1.0,
            max_tokens: 512,
            vision_model: None,
            params: LlmParams::default(),
        }
    }

    fn history(n: usize) -> Vec<HistoryMessage> {
        (0..n)
            .map(|i| HistoryMessage {
                author_name: "Ash".into(),
                is_assistant: i % 2 == 1,
                content: format!("history message number {i} with a little padding"),
                timestamp: None,
            })
            .collect()
    }

    fn memory(content: &str) -> RetrievedMemory {
        RetrievedMemory {
            id: Uuid::new_v4(),
            persona_id: "p1".into(),
            personality_id: "luna".into(),
            content: content.into(),
            canon_scope: CanonScope::Personal,
            summary_type: "conversation".into(),
            channel_id: None,
            session_id: None,
            created_at: "2026-07-01T10:30:00Z".parse().unwrap(),
            similarity: 0.9,
            persona_name: None,
            personality_name: None,
        }
    }

    fn input<'a>(
        p: &'a Personality,
        history: &'a [HistoryMessage],
        memories: &'a [RetrievedMemory],
    ) -> AssembleInput<'a> {
        AssembleInput {
            personality: p,
            current_message: "<from id=\"p1\">Ash</from>\n\nhello there".into(),
            history,
            memories,
            cross_channel: &[],
            referenced_messages: &[],
        }
    }

    #[test]
    fn u_shape_orders_persona_first_protocol_last() {
        let p = personality(4000);
        let h = history(4);
        let prompt = assemble(&input(&p, &h, &[]));

        let first = &prompt.messages[0];
        assert_eq!(first.role, PromptRole::System);
        assert!(first.content.starts_with("# You are Luna"));
        assert!(!first.content.contains("stay in character"));

        let last = prompt.messages.last().unwrap();
        assert_eq!(last.role, PromptRole::System);
        assert!(last.content.contains("always stay in character"));

        // Current user message sits immediately before the protocol.
        let second_last = &prompt.messages[prompt.messages.len() - 2];
        assert_eq!(second_last.role, PromptRole::User);
        assert!(second_last.content.contains("hello there"));
    }

    #[test]
    fn budget_invariants_hold() {
        let p = personality(2000);
        let h = history(40);
        let prompt = assemble(&input(&p, &h, &[]));

        assert!(prompt.stats.total_tokens <= 2000);
        assert_eq!(
            prompt.stats.messages_included + prompt.stats.messages_dropped,
            40
        );
    }

    #[test]
    fn recency_first_keeps_newest_messages() {
        let p = personality(700);
        let h = history(60);
        let prompt = assemble(&input(&p, &h, &[]));
        assert!(prompt.stats.messages_dropped > 0);

        let body: String = prompt
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        // Newest survives, oldest is dropped.
        assert!(body.contains("history message number 59"));
        assert!(!body.contains("history message number 0 "));
    }

    #[test]
    fn history_emitted_oldest_to_newest() {
        let p = personality(4000);
        let h = history(6);
        let prompt = assemble(&input(&p, &h, &[]));
        let body: String = prompt
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n");
        let first = body.find("history message number 0").unwrap();
        let last = body.find("history message number 5").unwrap();
        assert!(first < last);
    }

    #[test]
    fn memories_render_in_head_when_present() {
        let p = personality(4000);
        let m = vec![memory("remembers the user's cat is named Biscuit")];
        let prompt = assemble(&input(&p, &[], &m));
        assert!(prompt.messages[0].content.contains("## Relevant Memories"));
        assert!(prompt.messages[0].content.contains("Biscuit"));
        assert_eq!(prompt.stats.memories_included, 1);
    }

    #[test]
    fn no_memory_header_when_empty() {
        let p = personality(4000);
        let prompt = assemble(&input(&p, &[], &[]));
        assert!(!prompt.messages[0].content.contains("Relevant Memories"));
    }

    #[test]
    fn cross_channel_block_sits_after_persona() {
        let p = personality(4000);
        let groups = vec![CrossChannelGroup {
            channel_environment: "#general on Example".into(),
            messages: vec![CrossChannelMessage {
                author_name: "Ash".into(),
                content: "earlier elsewhere".into(),
            }],
        }];
        let prompt = assemble(&AssembleInput {
            personality: &p,
            current_message: "hi".into(),
            history: &[],
            memories: &[],
            cross_channel: &groups,
            referenced_messages: &[],
        });
        assert!(prompt.messages[1]
            .content
            .starts_with("<prior_conversations>"));
        assert_eq!(prompt.stats.cross_channel_groups, 1);
    }

    #[test]
    fn referenced_messages_sit_before_current() {
        let p = personality(4000);
        let refs = vec![ReferencedMessage {
            author: "Rook".into(),
            content: "the thing I quoted".into(),
            timestamp: None,
        }];
        let prompt = assemble(&AssembleInput {
            personality: &p,
            current_message: "what about that?".into(),
            history: &[],
            memories: &[],
            cross_channel: &[],
            referenced_messages: &refs,
        });
        let idx_ref = prompt
            .messages
            .iter()
            .position(|m| m.content.contains("Referenced Messages"))
            .unwrap();
        let idx_current = prompt
            .messages
            .iter()
            .position(|m| m.content.contains("what about that?"))
            .unwrap();
        assert!(idx_ref < idx_current);
    }

    #[test]
    fn tiny_window_never_underflows() {
        let p = personality(50);
        let h = history(10);
        let prompt = assemble(&input(&p, &h, &[]));
        // history_budget saturates at zero rather than wrapping.
        assert_eq!(prompt.stats.messages_included, 0);
        assert_eq!(prompt.stats.messages_dropped, 10);
    }
}
