//! Bounded retry with exponential backoff and jitter.
//!
//! Every retried operation carries a name so exhaustion logs point at the
//! failing call site, not a generic wrapper.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Delay before the given retry (1-based attempt that just failed).
    /// Exponential doubling from base, capped, with ±25% jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        let capped = exp.min(self.max_delay_ms);
        let jitter_span = capped / 4;
        let jittered = if jitter_span > 0 {
            capped - jitter_span + fastrand::u64(0..=jitter_span * 2)
        } else {
            capped
        };
        Duration::from_millis(jittered)
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between failures.
///
/// The final error is returned unchanged when attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    err = %e,
                    "operation failed; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(operation, attempt, err = %e, "operation failed; attempts exhausted");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let r: Result<u32, String> = with_retry(
            "test-op",
            RetryPolicy {
                base_delay_ms: 1,
                ..Default::default()
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
        )
        .await;
        assert_eq!(r, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let r: Result<u32, String> = with_retry(
            "test-op",
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(r, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let r: Result<(), String> = with_retry(
            "always-fails",
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
        )
        .await;
        assert_eq!(r, Err("boom".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 400,
        };
        // Jitter is ±25%, so bound checks are loose.
        let d1 = policy.delay_for_attempt(1).as_millis() as u64;
        let d3 = policy.delay_for_attempt(3).as_millis() as u64;
        assert!(d1 >= 75 && d1 <= 125, "d1={d1}");
        assert!(d3 <= 500, "d3={d3}");
    }
}
