//! 配置模块：从 YAML/JSON 文件加载后端列表与编排选项，并支持 AI_LIB_* 环境变量覆盖。
//!
//! # Configuration Module
//!
//! The structured options object the command-line layer hands over once per
//! invocation: a list of [`BackendConfig`]s plus [`OrchestratorOptions`].
//!
//! ## Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_LIB_MAX_CONCURRENCY` | `options.max_concurrency` |
//! | `AI_LIB_TIMEOUT_MS` | `options.timeout_ms` |
//! | `AI_LIB_RETRIES` | `options.retries` |
//! | `AI_LIB_CONTINUE_ON_ERROR` | `options.continue_on_error` |
//! | `AI_LIB_RUNS_PER_BACKEND` | `options.runs_per_backend` |
//! | `AI_LIB_BREAKER_FAILURE_THRESHOLD` | `options.circuit_breaker.failure_threshold` |
//! | `AI_LIB_BREAKER_COOLDOWN_MS` | `options.circuit_breaker.cooldown` |
//!
//! Unparseable values are logged and ignored.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::config::FanoutConfig;
//!
//! let cfg = FanoutConfig::from_yaml_str(r#"
//! backends:
//!   - name: local
//!     endpoint: http://localhost:11434/api/generate
//!     format: completion
//!     model: llama3
//! options:
//!   mode: parallel
//!   max_concurrency: 2
//!   retries: 1
//! "#).unwrap();
//! assert_eq!(cfg.backends.len(), 1);
//! assert!(cfg.validate().is_ok());
//! ```

use crate::backend::{Backend, BackendFactory};
use crate::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::types::BackendConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutConfig {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub options: OrchestratorOptions,
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl FanoutConfig {
    pub fn new(backends: Vec<BackendConfig>, options: OrchestratorOptions) -> Self {
        Self { backends, options }
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load YAML (`.yaml`/`.yml`) or JSON (`.json`) by extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        let cfg = match ext.as_deref() {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text)?,
            Some("json") => Self::from_json_str(&text)?,
            _ => {
                return Err(Error::configuration_with_context(
                    "unsupported config file extension",
                    ErrorContext::new()
                        .with_field_path("path")
                        .with_details(path.display().to_string())
                        .with_source("fanout_config"),
                ))
            }
        };
        debug!(path = %path.display(), backends = cfg.backends.len(), "config loaded");
        Ok(cfg)
    }

    /// `from_path`, then process-environment overrides, then validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let cfg = Self::from_path(path)?.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(self) -> Self {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    /// Apply `AI_LIB_*` overrides read through `lookup`.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let o = &mut self.options;
        if let Some(v) = parse_env::<usize>(&lookup, "AI_LIB_MAX_CONCURRENCY") {
            o.max_concurrency = v;
        }
        if let Some(v) = parse_env::<u64>(&lookup, "AI_LIB_TIMEOUT_MS") {
            o.timeout_ms = v;
        }
        if let Some(v) = parse_env::<u32>(&lookup, "AI_LIB_RETRIES") {
            o.retries = v;
        }
        if let Some(raw) = lookup("AI_LIB_CONTINUE_ON_ERROR") {
            match parse_bool(&raw) {
                Some(v) => o.continue_on_error = v,
                None => warn!(
                    var = "AI_LIB_CONTINUE_ON_ERROR",
                    value = %raw,
                    "ignoring unparseable environment override"
                ),
            }
        }
        if let Some(v) = parse_env::<u32>(&lookup, "AI_LIB_RUNS_PER_BACKEND") {
            o.runs_per_backend = v;
        }
        if let Some(v) = parse_env::<u32>(&lookup, "AI_LIB_BREAKER_FAILURE_THRESHOLD") {
            o.circuit_breaker = o.circuit_breaker.clone().with_failure_threshold(v);
        }
        if let Some(v) = parse_env::<u64>(&lookup, "AI_LIB_BREAKER_COOLDOWN_MS") {
            o.circuit_breaker = o
                .circuit_breaker
                .clone()
                .with_cooldown(Duration::from_millis(v));
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.options.validate()?;
        let mut seen = HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !seen.insert(backend.name.as_str()) {
                return Err(Error::configuration_with_context(
                    format!("duplicate backend name '{}'", backend.name),
                    ErrorContext::new()
                        .with_field_path("backends")
                        .with_source("fanout_config"),
                ));
            }
        }
        Ok(())
    }

    /// Orchestrator plus HTTP adapters for every configured backend.
    pub fn build(&self) -> Result<(Orchestrator, Vec<Arc<dyn Backend>>)> {
        self.validate()?;
        let orchestrator = Orchestrator::new(self.options.clone())?;
        let backends = BackendFactory::from_configs(self.backends.clone())?;
        Ok((orchestrator, backends))
    }
}
