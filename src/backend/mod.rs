//! 后端能力契约模块：所有引擎（云端、本地、自定义端点）统一实现的接口。
//!
//! # Backend Capability Contract
//!
//! Every engine the orchestrator can reach implements [`Backend`]. The
//! orchestrator never branches on which concrete adapter it holds; adding a
//! new variant means implementing this trait, nothing else.
//!
//! | Adapter | Description |
//! |---------|-------------|
//! | [`HttpBackend`] | JSON-over-HTTP endpoint (chat, completion, or raw body shape) |
//! | [`ScriptedBackend`] | In-process backend with scripted outcomes and latency |
//!
//! [`BackendFactory`] turns a [`BackendConfig`] into an `Arc<dyn Backend>`.

mod http;
mod scripted;

pub use http::HttpBackend;
pub use scripted::{ScriptedBackend, ScriptedOutcome};

use crate::types::{BackendConfig, BackendResponse, CostClass, Request};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// What a backend can take and what it costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Context window in tokens, when known.
    pub max_context_size: Option<u32>,
    pub supports_streaming: bool,
    pub cost_class: CostClass,
}

impl BackendCapabilities {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            max_context_size: cfg.context_window,
            supports_streaming: cfg.supports_streaming,
            cost_class: cfg.cost_class,
        }
    }

    /// Whether the request's estimated size fits the context window.
    pub fn fits(&self, request: &Request) -> bool {
        match self.max_context_size {
            Some(max) => request.estimated_tokens() <= max as usize,
            None => true,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Identity used for breakers, result slots and logs.
    fn name(&self) -> &str;

    fn config(&self) -> &BackendConfig;

    /// One call. Failures carry an [`crate::error_code::ErrorCode`] through
    /// [`Error::code`].
    async fn execute(&self, request: &Request) -> Result<BackendResponse>;

    /// Cheap reachability probe used to pre-filter a batch.
    async fn is_available(&self) -> bool;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::from_config(self.config())
    }
}

/// Builds adapters from configuration.
pub struct BackendFactory;

impl BackendFactory {
    pub fn from_config(cfg: BackendConfig) -> Result<Arc<dyn Backend>> {
        cfg.validate()?;
        if cfg.endpoint.is_none() {
            return Err(Error::configuration_with_context(
                format!("backend '{}' has no endpoint", cfg.name),
                ErrorContext::new()
                    .with_field_path(format!("backend.{}.endpoint", cfg.name))
                    .with_source("backend_factory"),
            ));
        }
        Ok(Arc::new(HttpBackend::new(cfg)?))
    }

    /// Build every backend, rejecting duplicate names.
    pub fn from_configs(cfgs: Vec<BackendConfig>) -> Result<Vec<Arc<dyn Backend>>> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(cfgs.len());
        for cfg in cfgs {
            if !seen.insert(cfg.name.clone()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate backend name '{}'", cfg.name),
                    ErrorContext::new()
                        .with_field_path("backends")
                        .with_source("backend_factory"),
                ));
            }
            out.push(Self::from_config(cfg)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_fit() {
        let caps = BackendCapabilities::from_config(&BackendConfig::new("a").with_context_window(2));
        assert!(caps.fits(&Request::new("abcd")));
        assert!(!caps.fits(&Request::new("abcdefghijkl")));
        let unbounded = BackendCapabilities::from_config(&BackendConfig::new("b"));
        assert!(unbounded.fits(&Request::new("x".repeat(10_000))));
    }

    #[test]
    fn test_factory_requires_endpoint() {
        assert!(BackendFactory::from_config(BackendConfig::new("a")).is_err());
        let built = BackendFactory::from_config(
            BackendConfig::new("a").with_endpoint("http://localhost:9/v1/chat/completions"),
        )
        .unwrap();
        assert_eq!(built.name(), "a");
    }

    #[test]
    fn test_factory_rejects_duplicates() {
        let cfgs = vec![
            BackendConfig::new("a").with_endpoint("http://localhost:9/x"),
            BackendConfig::new("a").with_endpoint("http://localhost:9/y"),
        ];
        assert!(matches!(
            BackendFactory::from_configs(cfgs),
            Err(Error::Configuration { .. })
        ));
    }
}
