//! Circuit breaker + retry composition for a single backend call.

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::retry::RetryPolicy;
use crate::error_code::ErrorCode;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of a resilient call plus how much work it took.
#[derive(Debug)]
pub struct CallOutcome<T> {
    pub result: Result<T>,
    /// Attempts that actually reached the operation.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Runs one logical call against one backend.
///
/// The breaker gates every attempt; the retry policy decides how many
/// attempts follow a failure. Each attempt is raced against
/// `attempt_timeout`. Retrying stops as soon as the breaker is open, so an
/// open backend burns neither retry budget nor backoff time.
pub struct ResilientCall {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
}

impl ResilientCall {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            policy,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// `op` receives the 0-based attempt number.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> CallOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            if let Err(rejected) = self.breaker.allow() {
                return CallOutcome {
                    result: Err(rejected),
                    attempts,
                    elapsed: started.elapsed(),
                };
            }

            let attempt = attempts;
            attempts += 1;
            let res = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op(attempt)).await {
                    Ok(r) => r,
                    Err(_) => Err(Error::backend(
                        self.breaker.name(),
                        ErrorCode::Timeout,
                        format!("attempt timed out after {}ms", limit.as_millis()),
                    )),
                },
                None => op(attempt).await,
            };

            let err = match res {
                Ok(value) => {
                    self.breaker.on_success();
                    return CallOutcome {
                        result: Ok(value),
                        attempts,
                        elapsed: started.elapsed(),
                    };
                }
                Err(e) => e,
            };

            if err.counts_against_breaker() {
                self.breaker.on_failure();
            }

            let delay = match self.policy.should_retry(attempt, &err) {
                Some(d) if self.breaker.state() != CircuitState::Open => d,
                _ => {
                    return CallOutcome {
                        result: Err(err),
                        attempts,
                        elapsed: started.elapsed(),
                    }
                }
            };

            debug!(
                backend = %self.breaker.name(),
                attempt,
                code = err.code().name(),
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
