//! Token measurement for prompt budgeting.
//!
//! Message bodies are measured with a real tokenizer; only structural
//! wrapper overhead (XML-ish tags around cross-channel groups) uses the
//! 4-chars-per-token estimate.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

static BPE: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("embedded cl100k vocabulary"));

/// Measured token count of a text.
pub fn count_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    BPE.encode_with_special_tokens(text).len()
}

/// Heuristic estimate for wrapper overhead: 4 characters per token,
/// rounded up.
pub fn estimate_wrapper_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(count_text_tokens(""), 0);
    }

    #[test]
    fn counting_is_monotonic_in_length() {
        let short = count_text_tokens("hello");
        let long = count_text_tokens("hello hello hello hello hello");
        assert!(long > short);
        assert!(short >= 1);
    }

    #[test]
    fn wrapper_estimate_rounds_up() {
        assert_eq!(estimate_wrapper_tokens(0), 0);
        assert_eq!(estimate_wrapper_tokens(1), 1);
        assert_eq!(estimate_wrapper_tokens(4), 1);
        assert_eq!(estimate_wrapper_tokens(5), 2);
        assert_eq!(estimate_wrapper_tokens(40), 10);
    }
}
