//! Rendering of retrieved memories into the prompt.

use chrono::{DateTime, Utc};

use reverie_memory::RetrievedMemory;

use crate::tokens::count_text_tokens;

const HEADER: &str = "## Relevant Memories";

/// Format one memory line: `- [<timestamp>] <content>`, timestamp omitted
/// when absent (some imported rows carry none).
fn format_line(content: &str, timestamp: Option<DateTime<Utc>>) -> String {
    match timestamp {
        Some(ts) => format!("- [{}] {}", ts.format("%Y-%m-%d %H:%M UTC"), content),
        None => format!("- {content}"),
    }
}

/// Render the ranked memory list under its header, greedily packing lines
/// until `budget_tokens` is spent. Input order (cosine rank) is preserved.
///
/// Returns the block and how many memories made it in. Zero memories emit
/// nothing at all — no empty header in the prompt.
pub fn render_memories(memories: &[RetrievedMemory], budget_tokens: usize) -> (String, usize) {
    if memories.is_empty() || budget_tokens == 0 {
        return (String::new(), 0);
    }

    let mut block = String::from(HEADER);
    let mut spent = count_text_tokens(HEADER);
    let mut included = 0;

    for memory in memories {
        let line = format_line(&memory.content, Some(memory.created_at));
        let cost = count_text_tokens(&line) + 1;
        if spent + cost > budget_tokens {
            break;
        }
        block.push('\n');
        block.push_str(&line);
        spent += cost;
        included += 1;
    }

    if included == 0 {
        return (String::new(), 0);
    }
    (block, included)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_memory::CanonScope;
    use uuid::Uuid;

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
            similarity: 0.92,
            persona_name: Some("Ash".into()),
            personality_name: Some("Luna".into()),
        }
    }

    #[test]
    fn empty_input_emits_nothing() {
        let (block, n) = render_memories(&[], 1000);
        assert!(block.is_empty());
        assert_eq!(n, 0);
    }

    #[test]
    fn lines_carry_header_and_timestamps() {
        let (block, n) = render_memories(&[memory("likes green tea")], 1000);
        assert!(block.starts_with("## Relevant Memories"));
        assert!(block.contains("- [2026-07-01 10:30 UTC] likes green tea"));
        assert_eq!(n, 1);
    }

    #[test]
    fn budget_stops_packing_preserving_rank_order() {
        let memories: Vec<RetrievedMemory> = (0..20)
            .map(|i| memory(&format!("memory number {i} with some padding text")))
            .collect();
        let (block, n) = render_memories(&memories, 60);
        assert!(n > 0 && n < 20, "included {n}");
        assert!(block.contains("memory number 0"));
        assert!(!block.contains("memory number 19"));
    }

    #[test]
    fn zero_budget_emits_nothing() {
        let (block, n) = render_memories(&[memory("x")], 0);
        assert!(block.is_empty());
        assert_eq!(n, 0);
    }

    #[test]
    fn line_without_timestamp_has_no_brackets() {
        assert_eq!(format_line("plain", None), "- plain");
    }
}
