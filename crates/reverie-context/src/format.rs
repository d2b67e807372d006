//! Message-body composition and speaker identification.

/// Sentinel text the chat bridge substitutes for voice-only submissions.
/// When it arrives with attachment content, the transcript replaces the
/// message entirely.
const VOICE_PLACEHOLDER: &str = "Hello";

/// Combine the user's text with preprocessing output.
///
/// Rules, in order:
/// - voice-only path (`Hello` placeholder + descriptions): descriptions alone
/// - both present: text, blank line, descriptions
/// - otherwise whichever side is non-empty; falling back to the original text
pub fn format_user_message(message_text: &str, attachment_descriptions: &str) -> String {
    let has_descriptions = !attachment_descriptions.trim().is_empty();
    let has_text = !message_text.trim().is_empty();

    if message_text == VOICE_PLACEHOLDER && has_descriptions {
        return attachment_descriptions.to_string();
    }
    match (has_text, has_descriptions) {
        (true, true) => format!("{message_text}\n\n{attachment_descriptions}"),
        (true, false) => message_text.to_string(),
        (false, true) => attachment_descriptions.to_string(),
        (false, false) => message_text.to_string(),
    }
}

/// Wrap the current user message with its speaker identity:
/// `<from id="<personaId>">DisplayName</from>\n\n<content>`.
///
/// When the persona name collides with the personality name
/// (case-insensitive), the platform username disambiguates the display.
pub fn wrap_speaker(
    persona_id: &str,
    persona_name: &str,
    username: &str,
    personality_name: &str,
    content: &str,
) -> String {
    let display = if persona_name.eq_ignore_ascii_case(personality_name) {
        format!("{persona_name} (@{username})")
    } else {
        persona_name.to_string()
    };
    format!("<from id=\"{persona_id}\">{display}</from>\n\n{content}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_only_path_uses_descriptions_alone() {
        let out = format_user_message("Hello", "[Audio transcript]: good morning");
        assert_eq!(out, "[Audio transcript]: good morning");
    }

    #[test]
    fn both_present_joins_with_blank_line() {
        let out = format_user_message("look at this", "[Image]: a red fox");
        assert_eq!(out, "look at this\n\n[Image]: a red fox");
    }

    #[test]
    fn text_only_passes_through() {
        assert_eq!(format_user_message("just text", ""), "just text");
    }

    #[test]
    fn descriptions_only_passes_through() {
        assert_eq!(format_user_message("", "[Image]: a cat"), "[Image]: a cat");
    }

    #[test]
    fn empty_both_returns_original() {
        assert_eq!(format_user_message("", ""), "");
    }

    #[test]
    fn hello_without_attachments_is_plain_text() {
        assert_eq!(format_user_message("Hello", ""), "Hello");
    }

    #[test]
    fn speaker_wrap_plain() {
        let out = wrap_speaker("p-1", "Ash", "ash_dc", "Luna", "hi there");
        assert_eq!(out, "<from id=\"p-1\">Ash</from>\n\nhi there");
    }

    #[test]
    fn speaker_wrap_disambiguates_name_collision() {
        let out = wrap_speaker("p-1", "luna", "luna_fan", "Luna", "hi");
        assert!(out.starts_with("<from id=\"p-1\">luna (@luna_fan)</from>"));
    }
}
