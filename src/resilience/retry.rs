//! Retry policy with exponential backoff and jitter.

use super::circuit_breaker::duration_ms;
use crate::Error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times, and how far apart, a retryable failure is attempted again.
///
/// Delay for attempt `n` (0-based count of failures so far) is
/// `min(base_delay * 2^n, max_delay) + uniform(0..=jitter)`, or the
/// backend-suggested `retry_after` when that is larger (still capped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    #[serde(rename = "jitter_ms", with = "duration_ms")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter(mut self, d: Duration) -> Self {
        self.jitter = d;
        self
    }

    /// Deterministic part of the delay.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = base.saturating_mul(factor);
        Duration::from_millis(delay).min(self.max_delay)
    }

    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut delay = self.base_backoff(attempt);
        if let Some(hint) = retry_after {
            delay = delay.max(hint.min(self.max_delay));
        }
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        }
        delay
    }

    /// Delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is 0-based (first failure => attempt=0). Circuit-open
    /// rejections are never retried here even though they are classified
    /// retryable for callers.
    pub fn should_retry(&self, attempt: u32, err: &Error) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        if matches!(err, Error::CircuitOpen { .. }) || !err.is_retryable() {
            return None;
        }
        Some(self.backoff(attempt, err.retry_after_ms().map(Duration::from_millis)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorCode;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(1_000))
            .with_jitter(Duration::ZERO)
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let p = no_jitter();
        assert_eq!(p.backoff(0, None), Duration::from_millis(100));
        assert_eq!(p.backoff(1, None), Duration::from_millis(200));
        assert_eq!(p.backoff(3, None), Duration::from_millis(800));
        assert_eq!(p.backoff(4, None), Duration::from_millis(1_000));
        assert_eq!(p.backoff(80, None), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = no_jitter().with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = p.backoff(0, None);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_retry_after_hint_wins_when_larger() {
        let p = no_jitter();
        assert_eq!(
            p.backoff(0, Some(Duration::from_millis(400))),
            Duration::from_millis(400)
        );
        assert_eq!(
            p.backoff(0, Some(Duration::from_secs(60))),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_should_retry_respects_classification_and_budget() {
        let p = no_jitter().with_max_retries(1);
        let transient = Error::backend("b", ErrorCode::RateLimited, "slow down");
        let fatal = Error::backend("b", ErrorCode::Authentication, "bad key");
        let open = Error::CircuitOpen {
            backend: "b".into(),
            retry_in_ms: 10,
        };

        assert!(p.should_retry(0, &transient).is_some());
        assert!(p.should_retry(1, &transient).is_none());
        assert!(p.should_retry(0, &fatal).is_none());
        assert!(p.should_retry(0, &open).is_none());
        assert!(RetryPolicy::none().should_retry(0, &transient).is_none());
    }

    #[test]
    fn test_serde_millis() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_retries":3,"base_delay_ms":50}"#).unwrap();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.base_delay, Duration::from_millis(50));
        assert_eq!(p.max_delay, Duration::from_secs(10));
    }
}
