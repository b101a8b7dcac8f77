//! Per-backend circuit breaker registry.

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use dashmap::DashMap;
use std::sync::Arc;

/// Owns one [`CircuitBreaker`] per backend name.
///
/// Breakers are created lazily on first use and live as long as the
/// registry, so state carries across runs of the same orchestrator. Two
/// registries never share state.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    pub fn defaults(&self) -> &CircuitBreakerConfig {
        &self.defaults
    }

    /// Use a dedicated config for one backend. Replaces any existing breaker
    /// for that name.
    pub fn configure(&self, backend: impl Into<String>, cfg: CircuitBreakerConfig) {
        let backend = backend.into();
        self.breakers.remove(&backend);
        self.overrides.insert(backend, cfg);
    }

    pub fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(backend) {
            return existing.clone();
        }
        self.breakers
            .entry(backend.to_string())
            .or_insert_with(|| {
                let cfg = self
                    .overrides
                    .get(backend)
                    .map(|c| c.clone())
                    .unwrap_or_else(|| self.defaults.clone());
                Arc::new(CircuitBreaker::new(backend, cfg))
            })
            .clone()
    }

    pub fn snapshot(&self, backend: &str) -> Option<CircuitBreakerSnapshot> {
        self.breakers.get(backend).map(|b| b.snapshot())
    }

    /// Snapshots of every known breaker, sorted by backend name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut out: Vec<_> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn reset(&self, backend: &str) -> bool {
        match self.breakers.get(backend) {
            Some(b) => {
                b.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
