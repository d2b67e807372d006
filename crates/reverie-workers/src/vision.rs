//! Vision model routing for image description.

use once_cell::sync::Lazy;
use regex::Regex;

/// Name patterns of models known to accept image input.
/// Case-insensitive; checked in order.
static VISION_CAPABLE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^gpt-4o",
        r"^gpt-4-vision",
        r"^gpt-4-turbo",
        r"claude-3",
        r"claude-4",
        r"gemini-1\.5",
        r"gemini-2\.",
        r"vision",
        r"llama.*vision",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("vision pattern"))
    .collect()
});

/// Whether `model` is in the known vision-capable set.
pub fn is_vision_capable(model: &str) -> bool {
    // Provider prefixes ("openai/gpt-4o") are stripped before the anchored
    // patterns run.
    let bare = model.rsplit('/').next().unwrap_or(model);
    VISION_CAPABLE
        .iter()
        .any(|p| p.is_match(bare) || p.is_match(model))
}

/// Pick the model for an image-description job:
/// personality's vision model → vision-capable main model → fallback.
pub fn route_vision_model<'a>(
    personality_vision_model: Option<&'a str>,
    main_model: &'a str,
    fallback: &'a str,
) -> &'a str {
    if let Some(vision) = personality_vision_model {
        if !vision.trim().is_empty() {
            return vision;
        }
    }
    if is_vision_capable(main_model) {
        return main_model;
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vision_models_match() {
        for model in [
            "gpt-4o",
            "gpt-4o-mini",
            "GPT-4-VISION-PREVIEW",
            "gpt-4-turbo",
            "claude-3-opus",
            "anthropic/claude-4-sonnet",
            "gemini-1.5-pro",
            "google/gemini-2.0-flash",
            "some-model-vision-v2",
            "llama-3.2-90b-vision",
        ] {
            assert!(is_vision_capable(model), "{model} should be vision capable");
        }
    }

    #[test]
    fn text_models_do_not_match() {
        for model in ["gpt-3.5-turbo", "mistral-large", "deepseek-r1", "qwq-32b"] {
            assert!(!is_vision_capable(model), "{model} should not match");
        }
    }

    #[test]
    fn personality_vision_model_wins() {
        assert_eq!(
            route_vision_model(Some("gemini-1.5-flash"), "gpt-3.5-turbo", "gpt-4o-mini"),
            "gemini-1.5-flash"
        );
    }

    #[test]
    fn capable_main_model_is_reused() {
        assert_eq!(
            route_vision_model(None, "gpt-4o", "gpt-4o-mini"),
            "gpt-4o"
        );
    }

    #[test]
    fn fallback_when_nothing_fits() {
        assert_eq!(
            route_vision_model(None, "mistral-large", "gpt-4o-mini"),
            "gpt-4o-mini"
        );
        // Empty override falls through too.
        assert_eq!(
            route_vision_model(Some(""), "mistral-large", "gpt-4o-mini"),
            "gpt-4o-mini"
        );
    }
}
