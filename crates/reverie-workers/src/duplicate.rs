//! Per-user sliding window of recent output embeddings.
//!
//! A fresh generation whose embedding lands at ≥ 0.88 cosine similarity
//! against any of the user's last ten outputs is rejected as a duplicate
//! and the generation retried.

use std::collections::VecDeque;

use dashmap::DashMap;

use reverie_core::config::DUPLICATE_SIMILARITY_THRESHOLD;
use reverie_embedding::vector::cosine_similarity;

/// Window size per user.
const WINDOW: usize = 10;

#[derive(Default)]
pub struct RecentOutputs {
    windows: DashMap<String, VecDeque<Vec<f32>>>,
}

impl RecentOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest similarity against the user's window, if any entry exists.
    pub fn max_similarity(&self, user_id: &str, embedding: &[f32]) -> Option<f32> {
        let window = self.windows.get(user_id)?;
        window
            .iter()
            .map(|v| cosine_similarity(v, embedding))
            .fold(None, |acc, s| Some(acc.map_or(s, |a: f32| a.max(s))))
    }

    /// Whether this embedding duplicates a recent output.
    pub fn is_duplicate(&self, user_id: &str, embedding: &[f32]) -> bool {
        self.max_similarity(user_id, embedding)
            .is_some_and(|s| s >= DUPLICATE_SIMILARITY_THRESHOLD)
    }

    /// Record an accepted output, evicting the oldest past the window size.
    pub fn record(&self, user_id: &str, embedding: Vec<f32>) {
        let mut window = self.windows.entry(user_id.to_string()).or_default();
        window.push_back(embedding);
        while window.len() > WINDOW {
            window.pop_front();
        }
    }

    pub fn window_len(&self, user_id: &str) -> usize {
        self.windows.get(user_id).map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_embedding::vector::l2_normalize;

    fn unit(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[direction] = 1.0;
        v
    }

    fn near(base: &[f32], epsilon: f32) -> Vec<f32> {
        let mut v: Vec<f32> = base.to_vec();
        v[1] += epsilon;
        l2_normalize(&mut v);
        v
    }

    #[test]
    fn empty_window_is_never_duplicate() {
        let outputs = RecentOutputs::new();
        assert!(!outputs.is_duplicate("u1", &unit(0)));
        assert_eq!(outputs.max_similarity("u1", &unit(0)), None);
    }

    #[test]
    fn identical_output_is_duplicate() {
        let outputs = RecentOutputs::new();
        outputs.record("u1", unit(0));
        assert!(outputs.is_duplicate("u1", &unit(0)));
    }

    #[test]
    fn near_identical_output_is_duplicate() {
        let outputs = RecentOutputs::new();
        outputs.record("u1", unit(0));
        let nearby = near(&unit(0), 0.05);
        assert!(outputs.is_duplicate("u1", &nearby));
    }

    #[test]
    fn orthogonal_output_is_not_duplicate() {
        let outputs = RecentOutputs::new();
        outputs.record("u1", unit(0));
        assert!(!outputs.is_duplicate("u1", &unit(1)));
    }

    #[test]
    fn windows_are_per_user() {
        let outputs = RecentOutputs::new();
        outputs.record("u1", unit(0));
        assert!(!outputs.is_duplicate("u2", &unit(0)));
    }

    #[test]
    fn window_caps_at_ten() {
        let outputs = RecentOutputs::new();
        for i in 0..15 {
            outputs.record("u1", unit(i % 8));
        }
        assert_eq!(outputs.window_len("u1"), 10);
    }
}
