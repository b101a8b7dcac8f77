//! Request payload shared by all backends of one run.

use super::config::BackendConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Overrides `OrchestratorOptions::runs_per_backend` when set.
    #[serde(default)]
    pub runs: Option<u32>,
}

impl Request {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_runs(mut self, runs: u32) -> Self {
        self.runs = Some(runs);
        self
    }

    /// Request override wins over the backend's own tuning.
    pub fn effective_temperature(&self, backend: &BackendConfig) -> Option<f32> {
        self.temperature.or(backend.temperature)
    }

    pub fn effective_max_tokens(&self, backend: &BackendConfig) -> Option<u32> {
        self.max_tokens.or(backend.max_tokens)
    }

    /// Context and message folded into a single prompt for single-prompt formats.
    pub fn prompt(&self) -> String {
        match self.context.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(ctx) => format!("{}\n\n{}", ctx, self.message),
            None => self.message.clone(),
        }
    }

    /// Very rough size estimate (~4 bytes per token) used for context-window checks.
    pub fn estimated_tokens(&self) -> usize {
        let bytes = self.message.len()
            + self.context.as_ref().map_or(0, |c| c.len())
            + self.system.as_ref().map_or(0, |s| s.len());
        (bytes + 3) / 4
    }
}
