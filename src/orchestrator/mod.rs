//! 编排器模块：将一个请求扇出到多个后端，在并发上限、熔断与重试的约束下收集全部结果。
//!
//! # Orchestrator Module
//!
//! Fan-out/fan-in over N backends. Each (backend, run index) slot passes
//! through the admission gate (parallel mode only), then through the
//! breaker-gated, retried call for its backend, and lands in an
//! [`AggregateResult`] keyed by slot rather than by arrival order.
//!
//! ## Failure policy
//!
//! - Backend failures are captured into the aggregate; `run` only returns
//!   `Err` for configuration problems detected before any backend is
//!   contacted.
//! - With `continue_on_error = false` the first failed slot cancels slots
//!   that have not started yet. Slots already in flight finish normally.
//!   Cancelled slots are recorded as failures with `ErrorCode::Cancelled`.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::backend::{Backend, ScriptedBackend};
//! use ai_lib_fanout::orchestrator::{Orchestrator, OrchestratorOptions};
//! use ai_lib_fanout::types::Request;
//! use std::sync::Arc;
//!
//! # async fn demo() -> ai_lib_fanout::Result<()> {
//! let orchestrator = Orchestrator::new(OrchestratorOptions::new().with_max_concurrency(2))?;
//! let backends: Vec<Arc<dyn Backend>> = vec![
//!     Arc::new(ScriptedBackend::new("a").always_reply("yes")),
//!     Arc::new(ScriptedBackend::new("b").always_reply("no")),
//! ];
//! let aggregate = orchestrator.run(&Request::new("ship it?"), &backends).await?;
//! assert_eq!(aggregate.status_line(), "2 succeeded, 0 failed");
//! # Ok(())
//! # }
//! ```

mod options;

pub use options::{ExecutionMode, OrchestratorOptions};

use crate::admission::AdmissionController;
use crate::backend::{Backend, BackendFactory};
use crate::cache::{BoundedCache, CacheKey, CacheKeyGenerator, CacheStats};
use crate::resilience::{CircuitBreakerRegistry, ResilientCall};
use crate::telemetry::{noop_sink, StatsSink};
use crate::types::{AggregateResult, BackendConfig, BackendResult, Request, RunStats, SlotKey};
use crate::{Error, ErrorContext, Result};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Builder for an [`Orchestrator`].
pub struct OrchestratorBuilder {
    options: OrchestratorOptions,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    admission: Option<AdmissionController>,
    stats_sink: Arc<dyn StatsSink>,
    response_cache: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            options: OrchestratorOptions::default(),
            breakers: None,
            admission: None,
            stats_sink: noop_sink(),
            response_cache: None,
        }
    }

    pub fn options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Share breaker state with other orchestrators. By default each
    /// orchestrator owns a fresh registry built from `options.circuit_breaker`.
    pub fn breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(registry);
        self
    }

    /// Share one concurrency gate across orchestrators. Overrides
    /// `options.max_concurrency`.
    pub fn admission(mut self, controller: AdmissionController) -> Self {
        self.admission = Some(controller);
        self
    }

    /// Inject a stats sink. Default is a no-op sink.
    pub fn stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.stats_sink = sink;
        self
    }

    /// Memoize successful single-run results, keeping at most `capacity`.
    pub fn response_cache(mut self, capacity: usize) -> Self {
        self.response_cache = Some(capacity);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        self.options.validate()?;
        let admission = match self.admission {
            Some(a) => a,
            None => AdmissionController::new(self.options.max_concurrency)?,
        };
        let breakers = self.breakers.unwrap_or_else(|| {
            Arc::new(CircuitBreakerRegistry::new(
                self.options.circuit_breaker.clone(),
            ))
        });
        let response_cache = match self.response_cache {
            Some(capacity) => Some(BoundedCache::new(capacity)?),
            None => None,
        };
        Ok(Orchestrator {
            options: self.options,
            breakers,
            admission,
            stats_sink: self.stats_sink,
            response_cache,
            keys: CacheKeyGenerator::new(),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Orchestrator {
    options: OrchestratorOptions,
    breakers: Arc<CircuitBreakerRegistry>,
    admission: AdmissionController,
    stats_sink: Arc<dyn StatsSink>,
    response_cache: Option<BoundedCache<CacheKey, BackendResult>>,
    keys: CacheKeyGenerator,
}

fn cancelled(key: SlotKey) -> BackendResult {
    BackendResult::failure(
        key,
        &Error::Cancelled("run stopped after an earlier failure".into()),
        Duration::ZERO,
        0,
    )
}

impl Orchestrator {
    pub fn new(options: OrchestratorOptions) -> Result<Self> {
        OrchestratorBuilder::new().options(options).build()
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.response_cache.as_ref().map(|c| c.stats())
    }

    /// Whether `aggregate` satisfies this orchestrator's success requirement.
    pub fn is_complete(&self, aggregate: &AggregateResult) -> bool {
        aggregate.is_complete(self.options.require_success)
    }

    /// Build adapters from configuration, then [`Orchestrator::run`].
    pub async fn run_configs(
        &self,
        request: &Request,
        configs: Vec<BackendConfig>,
    ) -> Result<AggregateResult> {
        let backends = BackendFactory::from_configs(configs)?;
        self.run(request, &backends).await
    }

    /// Run `request` against every backend.
    ///
    /// Slots per backend come from `request.runs`, falling back to
    /// `options.runs_per_backend`.
    pub async fn run(
        &self,
        request: &Request,
        backends: &[Arc<dyn Backend>],
    ) -> Result<AggregateResult> {
        let runs = request.runs.unwrap_or(self.options.runs_per_backend);
        Self::check_inputs(backends, runs)?;

        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        if backends.is_empty() {
            debug!(run_id = %run_id, "no backends, returning empty aggregate");
            let agg = AggregateResult::empty(run_id);
            self.finish(&agg).await;
            return Ok(agg);
        }

        let (active, skipped) = self.prefilter(request, backends).await;
        let order = active.iter().map(|b| b.name().to_string()).collect();
        let mut agg = AggregateResult::new(run_id.clone(), order);
        for name in skipped {
            agg.mark_skipped(name);
        }

        // repeated runs must really run
        let memoize = self.response_cache.is_some() && runs == 1;
        let slots: Vec<(Arc<dyn Backend>, SlotKey)> = active
            .iter()
            .flat_map(|b| (0..runs).map(move |i| (b.clone(), SlotKey::new(b.name(), i))))
            .collect();

        info!(
            run_id = %run_id,
            mode = %self.options.mode,
            backends = active.len(),
            slots = slots.len(),
            max_concurrency = self.admission.max_permits(),
            "fan-out started"
        );

        let cancel = CancellationToken::new();
        match self.options.mode {
            ExecutionMode::Parallel => {
                let mut pending: FuturesUnordered<_> = slots
                    .into_iter()
                    .map(|(backend, key)| {
                        self.parallel_slot(backend, key, request, memoize, &cancel)
                    })
                    .collect();
                while let Some(result) = pending.next().await {
                    agg.record(result)?;
                }
            }
            ExecutionMode::Sequential => {
                for (backend, key) in slots {
                    let result = if cancel.is_cancelled() {
                        cancelled(key)
                    } else {
                        self.execute_slot(backend.as_ref(), key, request, memoize)
                            .await
                    };
                    if !result.success {
                        self.on_slot_failed(&cancel);
                    }
                    agg.record(result)?;
                }
            }
        }

        agg.elapsed_ms = started.elapsed().as_millis() as u64;
        self.finish(&agg).await;
        Ok(agg)
    }

    fn check_inputs(backends: &[Arc<dyn Backend>], runs: u32) -> Result<()> {
        if runs == 0 {
            return Err(Error::configuration_with_context(
                "runs per backend must be at least 1",
                ErrorContext::new().with_field_path("request.runs"),
            ));
        }
        let mut seen = HashSet::new();
        for backend in backends {
            backend.config().validate()?;
            if !seen.insert(backend.name()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate backend name '{}'", backend.name()),
                    ErrorContext::new()
                        .with_field_path("backends")
                        .with_source("orchestrator"),
                ));
            }
        }
        Ok(())
    }

    async fn prefilter(
        &self,
        request: &Request,
        backends: &[Arc<dyn Backend>],
    ) -> (Vec<Arc<dyn Backend>>, Vec<String>) {
        if !self.options.prefilter_unavailable {
            return (backends.to_vec(), Vec::new());
        }
        let probes = join_all(backends.iter().map(|b| b.is_available())).await;
        let mut active = Vec::with_capacity(backends.len());
        let mut skipped = Vec::new();
        for (backend, reachable) in backends.iter().zip(probes) {
            let fits = backend.capabilities().fits(request);
            if reachable && fits {
                active.push(backend.clone());
            } else {
                info!(
                    backend = %backend.name(),
                    reachable,
                    fits,
                    "backend skipped before run"
                );
                skipped.push(backend.name().to_string());
            }
        }
        (active, skipped)
    }

    fn on_slot_failed(&self, cancel: &CancellationToken) {
        if !self.options.continue_on_error && !cancel.is_cancelled() {
            debug!("first failure with continue_on_error=false, cancelling pending slots");
            cancel.cancel();
        }
    }

    async fn parallel_slot(
        &self,
        backend: Arc<dyn Backend>,
        key: SlotKey,
        request: &Request,
        memoize: bool,
        cancel: &CancellationToken,
    ) -> BackendResult {
        let queued = Instant::now();
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(key),
            res = self.admission.acquire(self.options.admission_timeout()) => res,
        };
        let _permit = match acquired {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    backend = %key.backend,
                    run_index = key.run_index,
                    code = e.code().name(),
                    "slot not admitted"
                );
                self.on_slot_failed(cancel);
                return BackendResult::failure(key, &e, queued.elapsed(), 0);
            }
        };
        if cancel.is_cancelled() {
            return cancelled(key);
        }

        let result = self
            .execute_slot(backend.as_ref(), key, request, memoize)
            .await;
        if !result.success {
            self.on_slot_failed(cancel);
        }
        result
    }

    async fn execute_slot(
        &self,
        backend: &dyn Backend,
        key: SlotKey,
        request: &Request,
        memoize: bool,
    ) -> BackendResult {
        let cache_key = memoize.then(|| self.keys.generate(backend.config(), request));
        if let (Some(cache), Some(ck)) = (&self.response_cache, &cache_key) {
            if let Some(hit) = cache.get(ck) {
                debug!(backend = %key.backend, run_index = key.run_index, "served from response cache");
                return hit.replay(key);
            }
        }

        let call = ResilientCall::new(
            self.breakers.get(backend.name()),
            self.options.retry_policy(),
        )
        .with_attempt_timeout(self.options.timeout());
        let name = backend.name();
        let run_index = key.run_index;
        let outcome = call
            .run(move |attempt| {
                trace!(backend = %name, run_index, attempt, "attempt started");
                backend.execute(request)
            })
            .await;

        match outcome.result {
            Ok(response) => {
                let result =
                    BackendResult::success(key, response, outcome.elapsed, outcome.attempts);
                debug!(
                    backend = %result.backend,
                    run_index = result.run_index,
                    attempts = result.attempts,
                    latency_ms = result.latency_ms,
                    "slot succeeded"
                );
                if let (Some(cache), Some(ck)) = (&self.response_cache, cache_key) {
                    cache.set(ck, result.clone());
                }
                result
            }
            Err(e) => {
                warn!(
                    backend = %key.backend,
                    run_index = key.run_index,
                    attempts = outcome.attempts,
                    code = e.code().name(),
                    error = %e,
                    "slot failed"
                );
                BackendResult::failure(key, &e, outcome.elapsed, outcome.attempts)
            }
        }
    }

    async fn finish(&self, agg: &AggregateResult) {
        let complete = self.is_complete(agg);
        info!(
            run_id = %agg.run_id,
            status = %agg.status_line(),
            cancelled = agg.cancelled(),
            skipped = agg.skipped().len(),
            elapsed_ms = agg.elapsed_ms,
            complete,
            "fan-out finished"
        );
        if !complete {
            warn!(run_id = %agg.run_id, "run required a success and none happened");
        }
        let stats = RunStats::from_aggregate(agg, self.options.mode.as_str());
        if let Err(e) = self.stats_sink.record(stats).await {
            warn!(error = %e, "stats sink rejected run stats");
        }
    }
}
