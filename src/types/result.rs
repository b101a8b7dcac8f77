//! Per-slot results, the run aggregate, and run statistics.

use crate::error_code::ErrorCode;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Token accounting as reported by a backend, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// What a backend hands back on success. The orchestrator stamps identity,
/// latency and attempt counts on top of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub text: String,
    pub usage: Option<Usage>,
    /// Model that actually served the call, if the backend reports it.
    pub model: Option<String>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: None,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for FailureInfo {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Identity of one result slot: backend name plus run index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub backend: String,
    pub run_index: u32,
}

impl SlotKey {
    pub fn new(backend: impl Into<String>, run_index: u32) -> Self {
        Self {
            backend: backend.into(),
            run_index,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.backend, self.run_index)
    }
}

/// Outcome of one (backend, run index) slot. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    pub backend: String,
    pub run_index: u32,
    pub success: bool,
    pub response: Option<String>,
    pub error: Option<FailureInfo>,
    pub latency_ms: u64,
    pub usage: Option<Usage>,
    pub model: Option<String>,
    /// Unix epoch millis at completion.
    pub timestamp: u64,
    /// Attempts actually made against the backend (0 when rejected before contact).
    pub attempts: u32,
    pub cached: bool,
}

impl BackendResult {
    pub fn success(
        key: SlotKey,
        response: BackendResponse,
        latency: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            backend: key.backend,
            run_index: key.run_index,
            success: true,
            response: Some(response.text),
            error: None,
            latency_ms: latency.as_millis() as u64,
            usage: response.usage,
            model: response.model,
            timestamp: super::unix_millis(),
            attempts,
            cached: false,
        }
    }

    pub fn failure(key: SlotKey, err: &Error, latency: Duration, attempts: u32) -> Self {
        Self {
            backend: key.backend,
            run_index: key.run_index,
            success: false,
            response: None,
            error: Some(FailureInfo::from(err)),
            latency_ms: latency.as_millis() as u64,
            usage: None,
            model: None,
            timestamp: super::unix_millis(),
            attempts,
            cached: false,
        }
    }

    /// Re-issue a memoized success for a new slot.
    pub(crate) fn replay(&self, key: SlotKey) -> Self {
        Self {
            backend: key.backend,
            run_index: key.run_index,
            latency_ms: 0,
            timestamp: super::unix_millis(),
            attempts: 0,
            cached: true,
            ..self.clone()
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.backend.clone(), self.run_index)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn text(&self) -> Option<&str> {
        self.response.as_deref()
    }
}

/// Every slot of one run.
///
/// Results are kept in configuration order (backend position, then run
/// index) no matter in which order they completed. A slot can be recorded
/// once; `succeeded + failed == total()` always holds.
///
/// Loading a stored aggregate replays every result through [`Self::record`],
/// so counters and the duplicate guard are rebuilt rather than trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AggregateRecord")]
pub struct AggregateResult {
    pub run_id: String,
    backend_order: Vec<String>,
    results: Vec<BackendResult>,
    succeeded: usize,
    failed: usize,
    /// Backends dropped by the availability pre-filter; they own no slot.
    #[serde(default)]
    skipped: Vec<String>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    seen: HashSet<SlotKey>,
}

/// Wire form of [`AggregateResult`]; stored counters are ignored on load.
#[derive(Deserialize)]
struct AggregateRecord {
    run_id: String,
    backend_order: Vec<String>,
    results: Vec<BackendResult>,
    #[serde(default)]
    skipped: Vec<String>,
    #[serde(default)]
    elapsed_ms: u64,
}

impl TryFrom<AggregateRecord> for AggregateResult {
    type Error = Error;

    fn try_from(raw: AggregateRecord) -> Result<Self> {
        let mut agg = AggregateResult::new(raw.run_id, raw.backend_order);
        for result in raw.results {
            agg.record(result)?;
        }
        agg.skipped = raw.skipped;
        agg.elapsed_ms = raw.elapsed_ms;
        Ok(agg)
    }
}

impl AggregateResult {
    pub fn new(run_id: impl Into<String>, backend_order: Vec<String>) -> Self {
        Self {
            run_id: run_id.into(),
            backend_order,
            results: Vec::new(),
            succeeded: 0,
            failed: 0,
            skipped: Vec::new(),
            elapsed_ms: 0,
            seen: HashSet::new(),
        }
    }

    pub fn empty(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Vec::new())
    }

    fn position(&self, key: &SlotKey) -> (usize, u32) {
        let pos = self
            .backend_order
            .iter()
            .position(|b| *b == key.backend)
            .unwrap_or(usize::MAX);
        (pos, key.run_index)
    }

    /// Record a slot. Recording the same slot twice is rejected.
    pub fn record(&mut self, result: BackendResult) -> Result<()> {
        let key = result.key();
        if !self.seen.insert(key.clone()) {
            return Err(Error::runtime_with_context(
                format!("slot {} recorded twice", key),
                ErrorContext::new().with_source("aggregate_result"),
            ));
        }
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        let target = self.position(&key);
        let at = self
            .results
            .partition_point(|r| self.position(&r.key()) <= target);
        self.results.insert(at, result);
        Ok(())
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Failed slots that were never started because the run was cancelled.
    pub fn cancelled(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.error_code() == Some(ErrorCode::Cancelled))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub(crate) fn mark_skipped(&mut self, backend: impl Into<String>) {
        self.skipped.push(backend.into());
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn backend_order(&self) -> &[String] {
        &self.backend_order
    }

    pub fn results(&self) -> &[BackendResult] {
        &self.results
    }

    pub fn successes(&self) -> impl Iterator<Item = &BackendResult> {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BackendResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn by_backend<'a>(&'a self, backend: &'a str) -> impl Iterator<Item = &'a BackendResult> {
        self.results.iter().filter(move |r| r.backend == backend)
    }

    pub fn get(&self, backend: &str, run_index: u32) -> Option<&BackendResult> {
        self.results
            .iter()
            .find(|r| r.backend == backend && r.run_index == run_index)
    }

    /// `(slot, reason)` for every failed slot, in configuration order.
    pub fn failure_reasons(&self) -> Vec<(SlotKey, &FailureInfo)> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r.key(), e)))
            .collect()
    }

    /// A run is complete once every slot resolved, unless the caller
    /// required at least one success and none happened.
    pub fn is_complete(&self, require_success: bool) -> bool {
        !(require_success && self.succeeded == 0)
    }

    pub fn status_line(&self) -> String {
        format!("{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

/// Per-run performance counters handed to a [`crate::telemetry::StatsSink`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: String,
    pub mode: String,
    pub backends: usize,
    pub slots: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub attempts: u64,
    pub retries: u64,
    pub circuit_rejections: usize,
    pub admission_timeouts: usize,
    pub cache_hits: usize,
    pub wall_ms: u64,
    pub min_latency_ms: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<u64>,
    pub total_tokens: u64,
    pub finished_at: u64,
}

impl RunStats {
    pub fn from_aggregate(agg: &AggregateResult, mode: &str) -> Self {
        let count_code = |code: ErrorCode| {
            agg.results()
                .iter()
                .filter(|r| r.error_code() == Some(code))
                .count()
        };
        let attempts: u64 = agg.results().iter().map(|r| r.attempts as u64).sum();
        let retries: u64 = agg
            .results()
            .iter()
            .map(|r| r.attempts.saturating_sub(1) as u64)
            .sum();
        let latencies: Vec<u64> = agg
            .successes()
            .filter(|r| !r.cached)
            .map(|r| r.latency_ms)
            .collect();
        let avg = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        };

        Self {
            run_id: agg.run_id.clone(),
            mode: mode.to_string(),
            backends: agg.backend_order().len(),
            slots: agg.total(),
            succeeded: agg.succeeded(),
            failed: agg.failed(),
            cancelled: agg.cancelled(),
            attempts,
            retries,
            circuit_rejections: count_code(ErrorCode::CircuitOpen),
            admission_timeouts: count_code(ErrorCode::AdmissionTimeout),
            cache_hits: agg.results().iter().filter(|r| r.cached).count(),
            wall_ms: agg.elapsed_ms,
            min_latency_ms: latencies.iter().copied().min(),
            avg_latency_ms: avg,
            max_latency_ms: latencies.iter().copied().max(),
            total_tokens: agg
                .results()
                .iter()
                .filter_map(|r| r.usage)
                .map(|u| u.total_tokens as u64)
                .sum(),
            finished_at: super::unix_millis(),
        }
    }
}
