//! Per-invocation orchestration options.

use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every slot admitted through the concurrency gate at once.
    #[default]
    Parallel,
    /// One slot at a time, in configuration order.
    Sequential,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Sequential => "sequential",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(ExecutionMode::Parallel),
            "sequential" => Ok(ExecutionMode::Sequential),
            other => Err(Error::configuration_with_context(
                format!("unknown execution mode '{}'", other),
                ErrorContext::new()
                    .with_field_path("mode")
                    .with_details("expected 'parallel' or 'sequential'"),
            )),
        }
    }
}

/// Options handed in once per orchestration call.
///
/// `retries` is the retry budget; `backoff` only shapes the delay between
/// attempts (its own `max_retries` is ignored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorOptions {
    pub mode: ExecutionMode,
    pub max_concurrency: usize,
    /// Per-attempt timeout; 0 disables it.
    pub timeout_ms: u64,
    pub retries: u32,
    pub continue_on_error: bool,
    pub runs_per_backend: u32,
    /// Probe `is_available()` before the run and skip dead backends.
    pub prefilter_unavailable: bool,
    /// A run with zero successes is reported incomplete.
    pub require_success: bool,
    /// Longest a slot waits for admission; `None` waits indefinitely.
    pub admission_timeout_ms: Option<u64>,
    pub backoff: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            max_concurrency: 4,
            timeout_ms: 30_000,
            retries: 2,
            continue_on_error: true,
            runs_per_backend: 1,
            prefilter_unavailable: false,
            require_success: false,
            admission_timeout_ms: None,
            backoff: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl OrchestratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_continue_on_error(mut self, c: bool) -> Self {
        self.continue_on_error = c;
        self
    }

    pub fn with_runs_per_backend(mut self, runs: u32) -> Self {
        self.runs_per_backend = runs;
        self
    }

    pub fn with_prefilter_unavailable(mut self, enable: bool) -> Self {
        self.prefilter_unavailable = enable;
        self
    }

    pub fn with_require_success(mut self, require: bool) -> Self {
        self.require_success = require;
        self
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn admission_timeout(&self) -> Option<Duration> {
        self.admission_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.backoff.clone().with_max_retries(self.retries)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::configuration_with_context(
                "max_concurrency must be at least 1",
                ErrorContext::new().with_field_path("options.max_concurrency"),
            ));
        }
        if self.runs_per_backend == 0 {
            return Err(Error::configuration_with_context(
                "runs_per_backend must be at least 1",
                ErrorContext::new().with_field_path("options.runs_per_backend"),
            ));
        }
        if self.backoff.base_delay > self.backoff.max_delay {
            return Err(Error::configuration_with_context(
                "backoff base delay exceeds max delay",
                ErrorContext::new().with_field_path("options.backoff"),
            ));
        }
        Ok(())
    }
}
