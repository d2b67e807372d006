//! User-reference resolution in the outgoing message text.
//!
//! Three patterns, scanned in order:
//!   1. `@[<name>](user:<uuid>)` — legacy shapes markdown
//!   2. `<@<snowflake>>`         — platform mention, 17–20 digit id
//!   3. `@<word>`                — simple mention by username
//!
//! Resolved references substitute the target's default persona name; a
//! self-reference substitutes the name without joining the participants
//! list. Raw markup never survives into the prompt.

use once_cell::sync::Lazy;
use regex::Regex;

use reverie_memory::{UserDirectory, UserRef};

static SHAPES_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@\[([^\]]+)\]\(user:([0-9a-fA-F-]{36})\)").expect("shapes mention pattern")
});
static PLATFORM_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?([0-9]{17,20})>").expect("platform mention pattern"));
static SIMPLE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("simple mention pattern"));

/// Output of a resolution pass.
#[derive(Debug, Clone)]
pub struct ResolvedMentions {
    pub text: String,
    /// Personas mentioned besides the active speaker.
    pub participants: Vec<UserRef>,
}

/// Resolve every reference in `text` against the directory.
pub async fn resolve_mentions(
    text: &str,
    directory: &dyn UserDirectory,
    active_persona_id: &str,
) -> ResolvedMentions {
    let mut participants: Vec<UserRef> = Vec::new();
    let mut out = String::from(text);

    // Pass 1: shapes markdown. Fallback is the embedded display name.
    // Malformed uuids (wrong segment shape) skip the lookup entirely.
    out = replace_all_async(&SHAPES_MENTION, &out, |caps| {
        let name = caps[1].to_string();
        let uuid = caps[2].to_string();
        async move {
            let resolved = if reverie_core::validate::is_valid_uuid(&uuid) {
                directory.by_shapes_uuid(&uuid).await
            } else {
                None
            };
            (resolved, name)
        }
    })
    .await
    .apply(&mut participants, active_persona_id);

    // Pass 2: platform snowflakes. No display name in the markup; fall back
    // to the bare id so the angle-bracket form never reaches the prompt.
    out = replace_all_async(&PLATFORM_MENTION, &out, |caps| {
        let snowflake = caps[1].to_string();
        let fallback = format!("@{snowflake}");
        async move {
            let resolved = directory.by_platform_id(&snowflake).await;
            (resolved, fallback)
        }
    })
    .await
    .apply(&mut participants, active_persona_id);

    // Pass 3: simple @word mentions, case-insensitive username lookup.
    // Unresolved words keep their original text.
    out = replace_all_async(&SIMPLE_MENTION, &out, |caps| {
        let word = caps[1].to_string();
        let fallback = format!("@{word}");
        async move {
            let resolved = directory.by_username(&word).await;
            (resolved, fallback)
        }
    })
    .await
    .apply(&mut participants, active_persona_id);

    ResolvedMentions {
        text: out,
        participants,
    }
}

/// One pattern pass: every match resolved (or not) with its fallback text.
struct PassResult {
    segments: Vec<Segment>,
}

enum Segment {
    Literal(String),
    Resolved(UserRef),
    Fallback(String),
}

impl PassResult {
    /// Render the pass output, recording non-self participants.
    fn apply(self, participants: &mut Vec<UserRef>, active_persona_id: &str) -> String {
        let mut out = String::new();
        for segment in self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(&s),
                Segment::Fallback(s) => out.push_str(&s),
                Segment::Resolved(user) => {
                    out.push_str(&user.persona_name);
                    let is_self = user.persona_id == active_persona_id;
                    let seen = participants.iter().any(|p| p.persona_id == user.persona_id);
                    if !is_self && !seen {
                        participants.push(user);
                    }
                }
            }
        }
        out
    }
}

async fn replace_all_async<F, Fut>(pattern: &Regex, text: &str, mut lookup: F) -> PassResult
where
    F: FnMut(&regex::Captures<'_>) -> Fut,
    Fut: std::future::Future<Output = (Option<UserRef>, String)>,
{
    let mut segments = Vec::new();
    let mut last_end = 0;

    // Match spans are collected first so the async lookups don't hold the
    // regex iterator across awaits.
    let spans: Vec<(usize, usize)> = pattern
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    for (start, end) in spans {
        segments.push(Segment::Literal(text[last_end..start].to_string()));
        let caps = pattern
            .captures(&text[start..end])
            .expect("span re-captures its own match");
        let (resolved, fallback) = lookup(&caps).await;
        match resolved {
            Some(user) => segments.push(Segment::Resolved(user)),
            None => segments.push(Segment::Fallback(fallback)),
        }
        last_end = end;
    }
    segments.push(Segment::Literal(text[last_end..].to_string()));

    PassResult { segments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FakeDirectory {
        by_uuid: HashMap<String, UserRef>,
        by_platform: HashMap<String, UserRef>,
        by_name: HashMap<String, UserRef>,
    }

    impl FakeDirectory {
        fn new() -> Self {
            Self {
                by_uuid: HashMap::new(),
                by_platform: HashMap::new(),
                by_name: HashMap::new(),
            }
        }

        fn user(persona_id: &str, persona_name: &str, username: &str) -> UserRef {
            UserRef {
                user_id: format!("user-{username}"),
                username: username.to_string(),
                persona_id: persona_id.to_string(),
                persona_name: persona_name.to_string(),
            }
        }
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn by_shapes_uuid(&self, uuid: &str) -> Option<UserRef> {
            self.by_uuid.get(uuid).cloned()
        }
        async fn by_platform_id(&self, snowflake: &str) -> Option<UserRef> {
            self.by_platform.get(snowflake).cloned()
        }
        async fn by_username(&self, name: &str) -> Option<UserRef> {
            self.by_name.get(&name.to_lowercase()).cloned()
        }
    }

    #[tokio::test]
    async fn shapes_mention_resolves_to_persona_name() {
        let mut dir = FakeDirectory::new();
        dir.by_uuid.insert(
            "123e4567-e89b-12d3-a456-426614174000".into(),
            FakeDirectory::user("p-ash", "Ash", "ash_dc"),
        );
        let out = resolve_mentions(
            "hey @[Old Name](user:123e4567-e89b-12d3-a456-426614174000)!",
            &dir,
            "p-self",
        )
        .await;
        assert_eq!(out.text, "hey Ash!");
        assert_eq!(out.participants.len(), 1);
        assert_eq!(out.participants[0].persona_name, "Ash");
    }

    #[tokio::test]
    async fn shapes_mention_miss_falls_back_to_name() {
        let dir = FakeDirectory::new();
        let out = resolve_mentions(
            "hey @[Casey](user:123e4567-e89b-12d3-a456-426614174000)!",
            &dir,
            "p-self",
        )
        .await;
        assert_eq!(out.text, "hey Casey!");
        assert!(out.participants.is_empty());
    }

    #[tokio::test]
    async fn platform_mention_resolves() {
        let mut dir = FakeDirectory::new();
        dir.by_platform.insert(
            "123456789012345678".into(),
            FakeDirectory::user("p-rook", "Rook", "rook99"),
        );
        let out = resolve_mentions("ping <@123456789012345678> now", &dir, "p-self").await;
        assert_eq!(out.text, "ping Rook now");
    }

    #[tokio::test]
    async fn platform_mention_miss_drops_markup() {
        let dir = FakeDirectory::new();
        let out = resolve_mentions("ping <@123456789012345678>", &dir, "p-self").await;
        assert!(!out.text.contains('<'));
        assert!(out.text.contains("@123456789012345678"));
    }

    #[tokio::test]
    async fn simple_mention_is_case_insensitive() {
        let mut dir = FakeDirectory::new();
        dir.by_name
            .insert("casey".into(), FakeDirectory::user("p-casey", "Casey", "casey"));
        let out = resolve_mentions("thanks @CASEY!", &dir, "p-self").await;
        assert_eq!(out.text, "thanks Casey!");
    }

    #[tokio::test]
    async fn self_reference_substitutes_without_participant() {
        let mut dir = FakeDirectory::new();
        dir.by_name
            .insert("me".into(), FakeDirectory::user("p-self", "Me", "me"));
        let out = resolve_mentions("as @me said", &dir, "p-self").await;
        assert_eq!(out.text, "as Me said");
        assert!(out.participants.is_empty());
    }

    #[tokio::test]
    async fn unresolved_simple_mention_keeps_text() {
        let dir = FakeDirectory::new();
        let out = resolve_mentions("cc @nobody", &dir, "p-self").await;
        assert_eq!(out.text, "cc @nobody");
    }

    #[tokio::test]
    async fn duplicate_mentions_dedupe_participants() {
        let mut dir = FakeDirectory::new();
        dir.by_name
            .insert("ash".into(), FakeDirectory::user("p-ash", "Ash", "ash"));
        let out = resolve_mentions("@ash and again @ash", &dir, "p-self").await;
        assert_eq!(out.participants.len(), 1);
    }
}
