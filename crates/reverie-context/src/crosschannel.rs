//! Cross-channel prior-conversation packing.
//!
//! Groups arrive most-recent-channel first, messages chronological within
//! each group. Packing is greedy: the first message that would blow the
//! sub-budget closes its group, and a group that overflows on its own
//! wrapper short-circuits the remaining groups entirely.

use crate::tokens::{count_text_tokens, estimate_wrapper_tokens};
use crate::types::CrossChannelGroup;

const OUTER_OPEN: &str = "<prior_conversations>";
const OUTER_CLOSE: &str = "</prior_conversations>";

/// Result of a packing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedCrossChannel {
    pub block: String,
    pub groups_included: usize,
    pub messages_included: usize,
}

impl PackedCrossChannel {
    fn empty() -> Self {
        Self {
            block: String::new(),
            groups_included: 0,
            messages_included: 0,
        }
    }
}

/// Pack groups into `<prior_conversations>` under `budget_tokens`.
pub fn pack_cross_channel(groups: &[CrossChannelGroup], budget_tokens: usize) -> PackedCrossChannel {
    if groups.is_empty() || budget_tokens == 0 {
        return PackedCrossChannel::empty();
    }

    let outer_overhead = estimate_wrapper_tokens(OUTER_OPEN.len() + OUTER_CLOSE.len() + 2);
    if outer_overhead >= budget_tokens {
        return PackedCrossChannel::empty();
    }

    let mut spent = outer_overhead;
    let mut rendered_groups: Vec<String> = Vec::new();
    let mut messages_included = 0;

    'groups: for group in groups {
        let location = format!("<location>{}</location>", group.channel_environment);
        // Per-group overhead: location line plus the <channel_history> tags,
        // estimated with the 4-chars-per-token heuristic.
        let group_overhead = estimate_wrapper_tokens(
            location.len() + "<channel_history>".len() + "</channel_history>".len() + 3,
        );
        if spent + group_overhead > budget_tokens {
            // A group whose wrapper alone exceeds the remaining sub-budget
            // ends the packing for every later (older) group too.
            break 'groups;
        }

        let mut lines: Vec<String> = Vec::new();
        let mut group_spent = group_overhead;
        for message in &group.messages {
            let line = format!("{}: {}", message.author_name, message.content);
            let cost = count_text_tokens(&line) + 1;
            if spent + group_spent + cost > budget_tokens {
                break;
            }
            group_spent += cost;
            lines.push(line);
        }

        if lines.is_empty() {
            continue;
        }
        messages_included += lines.len();
        spent += group_spent;
        rendered_groups.push(format!(
            "{location}\n<channel_history>\n{}\n</channel_history>",
            lines.join("\n")
        ));
    }

    if rendered_groups.is_empty() {
        return PackedCrossChannel::empty();
    }

    let block = format!(
        "{OUTER_OPEN}\n{}\n{OUTER_CLOSE}",
        rendered_groups.join("\n")
    );
    PackedCrossChannel {
        block,
        groups_included: rendered_groups.len(),
        messages_included,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CrossChannelMessage;

    fn group(environment: &str, messages: &[&str]) -> CrossChannelGroup {
        CrossChannelGroup {
            channel_environment: environment.to_string(),
            messages: messages
                .iter()
                .map(|m| CrossChannelMessage {
                    author_name: "Ash".into(),
                    content: m.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn empty_groups_pack_to_nothing() {
        let packed = pack_cross_channel(&[], 500);
        assert!(packed.block.is_empty());
    }

    #[test]
    fn wraps_in_prior_conversations_tags() {
        let packed = pack_cross_channel(&[group("#general on Example", &["hi", "bye"])], 500);
        assert!(packed.block.starts_with("<prior_conversations>"));
        assert!(packed.block.ends_with("</prior_conversations>"));
        assert!(packed.block.contains("<location>#general on Example</location>"));
        assert!(packed.block.contains("<channel_history>"));
        assert_eq!(packed.groups_included, 1);
        assert_eq!(packed.messages_included, 2);
    }

    #[test]
    fn budget_truncates_within_a_group() {
        let many: Vec<String> = (0..50)
            .map(|i| format!("message number {i} with plenty of filler words"))
            .collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let packed = pack_cross_channel(&[group("#general", &refs)], 80);
        assert!(packed.messages_included > 0);
        assert!(packed.messages_included < 50);
    }

    #[test]
    fn most_recent_channel_packs_first() {
        let packed = pack_cross_channel(
            &[
                group("#recent", &["newest channel message"]),
                group("#older", &["older channel message"]),
            ],
            42,
        );
        // Tight budget: the recent group wins, the older one is cut.
        assert!(packed.block.contains("#recent"));
        assert!(!packed.block.contains("#older"));
    }

    #[test]
    fn zero_budget_packs_nothing() {
        let packed = pack_cross_channel(&[group("#general", &["hi"])], 0);
        assert!(packed.block.is_empty());
        assert_eq!(packed.groups_included, 0);
    }
}
