//! Backend configuration.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

/// Body shape an HTTP backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendFormat {
    /// `{"model", "messages": [...]}` body, reply text at `choices[0].message.content`.
    #[default]
    Chat,
    /// `{"model", "prompt"}` body, reply text at `response`, `text` or `choices[0].text`.
    Completion,
    /// The request is posted as-is and the reply body is taken verbatim.
    Raw,
}

/// Rough cost bucket reported through backend capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Free,
    #[default]
    Low,
    Medium,
    High,
}

/// One backend target. Immutable once a run starts; the orchestrator only
/// ever holds it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub format: BackendFormat,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub cost_class: CostClass,
    /// Never written back out; resolved from `<NAME>_API_KEY` when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl BackendConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: None,
            model: None,
            format: BackendFormat::default(),
            temperature: None,
            max_tokens: None,
            context_window: None,
            supports_streaming: false,
            cost_class: CostClass::default(),
            api_key: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_format(mut self, format: BackendFormat) -> Self {
        self.format = format;
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

    pub fn with_context_window(mut self, n: u32) -> Self {
        self.context_window = Some(n);
        self
    }

    pub fn with_cost_class(mut self, class: CostClass) -> Self {
        self.cost_class = class;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Reject malformed configs before any work starts.
    pub fn validate(&self) -> Result<()> {
        let ctx = || ErrorContext::new().with_source("backend_config");
        if self.name.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "backend name must not be empty",
                ctx().with_field_path("backend.name"),
            ));
        }
        if let Some(ref endpoint) = self.endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid endpoint for backend '{}'", self.name),
                    ctx()
                        .with_field_path(format!("backend.{}.endpoint", self.name))
                        .with_details(e.to_string()),
                )
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Error::configuration_with_context(
                    format!("unsupported endpoint scheme '{}'", parsed.scheme()),
                    ctx().with_field_path(format!("backend.{}.endpoint", self.name)),
                ));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::configuration_with_context(
                    format!("temperature {} out of range", t),
                    ctx()
                        .with_field_path(format!("backend.{}.temperature", self.name))
                        .with_details("expected 0.0..=2.0"),
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::configuration_with_context(
                "max_tokens must be positive",
                ctx().with_field_path(format!("backend.{}.max_tokens", self.name)),
            ));
        }
        Ok(())
    }

    /// `<NAME>_API_KEY` with non-alphanumerics folded to `_`.
    pub fn api_key_env_var(&self) -> String {
        let name: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_API_KEY", name)
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(self.api_key_env_var()).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let cfg = BackendConfig::new("openai")
            .with_endpoint("https://api.example.com/v1/chat/completions")
            .with_temperature(0.7)
            .with_max_tokens(512);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(BackendConfig::new("  ").validate().is_err());
        assert!(BackendConfig::new("a")
            .with_endpoint("not a url")
            .validate()
            .is_err());
        assert!(BackendConfig::new("a")
            .with_endpoint("ftp://example.com")
            .validate()
            .is_err());
        assert!(BackendConfig::new("a")
            .with_temperature(3.5)
            .validate()
            .is_err());
        assert!(BackendConfig::new("a").with_max_tokens(0).validate().is_err());
    }

    #[test]
    fn test_api_key_env_var_name() {
        let cfg = BackendConfig::new("local-llama.v2");
        assert_eq!(cfg.api_key_env_var(), "LOCAL_LLAMA_V2_API_KEY");
    }

    #[test]
    fn test_api_key_not_serialized() {
        let cfg = BackendConfig::new("a").with_api_key("secret");
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("secret"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let cfg: BackendConfig = serde_yaml::from_str("name: fast\nformat: completion\n").unwrap();
        assert_eq!(cfg.format, BackendFormat::Completion);
        assert_eq!(cfg.cost_class, CostClass::Low);
        assert!(cfg.endpoint.is_none());
    }
}
