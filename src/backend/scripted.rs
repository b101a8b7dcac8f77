//! In-process backend driven by a script of outcomes.
//!
//! Used for dry runs, benchmarks and tests: no network, deterministic
//! answers, configurable latency.

use super::Backend;
use crate::error_code::ErrorCode;
use crate::types::{BackendConfig, BackendResponse, Request, Usage};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What one call to a [`ScriptedBackend`] does.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Answer with fixed text.
    Reply(String),
    /// Answer with the request message.
    Echo,
    /// Fail with the given classification.
    Fail(ErrorCode, String),
    /// Never answer; relies on the caller's timeout.
    Hang,
}

pub struct ScriptedBackend {
    cfg: BackendConfig,
    latency: Duration,
    script: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: ScriptedOutcome,
    available: AtomicBool,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedBackend {
    /// Echoes every request with no latency.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(BackendConfig::new(name))
    }

    pub fn from_config(cfg: BackendConfig) -> Self {
        Self {
            cfg,
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: ScriptedOutcome::Echo,
            available: AtomicBool::new(true),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Outcome once the script is exhausted.
    pub fn always(mut self, outcome: ScriptedOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    pub fn always_reply(self, text: impl Into<String>) -> Self {
        self.always(ScriptedOutcome::Reply(text.into()))
    }

    pub fn always_fail(self, code: ErrorCode) -> Self {
        self.always(ScriptedOutcome::Fail(code, format!("scripted {}", code.name())))
    }

    /// Queue one outcome ahead of the fallback.
    pub fn then(self, outcome: ScriptedOutcome) -> Self {
        self.lock_script().push_back(outcome);
        self
    }

    pub fn then_fail(self, code: ErrorCode) -> Self {
        self.then(ScriptedOutcome::Fail(code, format!("scripted {}", code.name())))
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.then(ScriptedOutcome::Reply(text.into()))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Calls that reached `execute`.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `execute` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<ScriptedOutcome>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn config(&self) -> &BackendConfig {
        &self.cfg
    }

    async fn execute(&self, request: &Request) -> Result<BackendResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let outcome = self.next_outcome();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let text = match outcome {
            ScriptedOutcome::Reply(text) => text,
            ScriptedOutcome::Echo => request.message.clone(),
            ScriptedOutcome::Fail(code, message) => {
                return Err(Error::backend(&self.cfg.name, code, message))
            }
            ScriptedOutcome::Hang => return std::future::pending().await,
        };
        let prompt_tokens = request.estimated_tokens() as u32;
        let completion_tokens = text.len().div_ceil(4) as u32;
        Ok(BackendResponse::text(text)
            .with_usage(Usage::new(prompt_tokens, completion_tokens))
            .with_model(self.cfg.model.clone().unwrap_or_else(|| "scripted".into())))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
