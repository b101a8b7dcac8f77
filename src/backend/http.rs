//! JSON-over-HTTP backend adapter.

use super::Backend;
use crate::error_code::ErrorCode;
use crate::types::{BackendConfig, BackendFormat, BackendResponse, Request, Usage};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

pub struct HttpBackend {
    cfg: BackendConfig,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(cfg: BackendConfig) -> Result<Self> {
        let endpoint = cfg.endpoint.clone().ok_or_else(|| {
            Error::configuration_with_context(
                format!("backend '{}' has no endpoint", cfg.name),
                ErrorContext::new().with_source("http_backend"),
            )
        })?;

        // Minimal production-friendly defaults (env-overridable).
        let timeout_secs = env::var("AI_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(120);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(8),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;

        let api_key = cfg.resolve_api_key();
        Ok(Self {
            cfg,
            client,
            endpoint,
            api_key,
        })
    }

    fn body(&self, request: &Request) -> Result<Value> {
        let model = self.cfg.model.clone();
        let temperature = request.effective_temperature(&self.cfg);
        let max_tokens = request.effective_max_tokens(&self.cfg);

        let mut body = match self.cfg.format {
            BackendFormat::Chat => {
                let mut messages = Vec::new();
                if let Some(ref system) = request.system {
                    messages.push(json!({"role": "system", "content": system}));
                }
                messages.push(json!({"role": "user", "content": request.prompt()}));
                json!({"model": model, "messages": messages, "stream": false})
            }
            BackendFormat::Completion => {
                let mut b = json!({"model": model, "prompt": request.prompt(), "stream": false});
                if let Some(ref system) = request.system {
                    b["system"] = json!(system);
                }
                b
            }
            BackendFormat::Raw => return Ok(serde_json::to_value(request)?),
        };
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        if let Some(n) = max_tokens {
            body["max_tokens"] = json!(n);
        }
        Ok(body)
    }

    fn extract_text(&self, raw: &str) -> Result<BackendResponse> {
        if self.cfg.format == BackendFormat::Raw {
            return Ok(match serde_json::from_str::<Value>(raw) {
                Ok(Value::String(s)) => BackendResponse::text(s),
                _ => BackendResponse::text(raw),
            });
        }

        let json: Value = serde_json::from_str(raw)?;
        let text = match self.cfg.format {
            BackendFormat::Chat => json
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            _ => json
                .get("response")
                .or_else(|| json.get("text"))
                .or_else(|| json.pointer("/choices/0/text"))
                .and_then(Value::as_str),
        };
        let text = text.ok_or_else(|| {
            Error::backend(
                &self.cfg.name,
                ErrorCode::Unknown,
                "response body carries no text",
            )
        })?;

        let mut resp = BackendResponse::text(text);
        if let Some(usage) = json.get("usage") {
            let prompt = usage.get("prompt_tokens").and_then(Value::as_u64);
            let completion = usage.get("completion_tokens").and_then(Value::as_u64);
            if let (Some(p), Some(c)) = (prompt, completion) {
                resp = resp.with_usage(Usage::new(p as u32, c as u32));
            }
        }
        if let Some(model) = json.get("model").and_then(Value::as_str) {
            resp = resp.with_model(model);
        }
        Ok(resp)
    }

    fn classify(&self, status: u16, headers: &HeaderMap, body: &str) -> Error {
        let provider_code = serde_json::from_str::<Value>(body).ok().and_then(|v| {
            let err = v.get("error")?;
            err.get("code")
                .or_else(|| err.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let code = provider_code
            .as_deref()
            .and_then(ErrorCode::from_provider_code)
            .unwrap_or_else(|| ErrorCode::from_http_status(status));
        let retry_after_ms = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(|secs| secs.saturating_mul(1000));

        let mut message = format!("HTTP {}", status);
        let snippet: String = body.chars().take(200).collect();
        if !snippet.trim().is_empty() {
            message.push_str(": ");
            message.push_str(snippet.trim());
        }
        Error::Backend {
            backend: self.cfg.name.clone(),
            code,
            message,
            retry_after_ms,
        }
    }

    /// `scheme://host[:port]/` of the endpoint.
    fn probe_url(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.endpoint).ok()?;
        let host = parsed.host_str()?;
        Some(match parsed.port() {
            Some(port) => format!("{}://{}:{}/", parsed.scheme(), host, port),
            None => format!("{}://{}/", parsed.scheme(), host),
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    fn config(&self) -> &BackendConfig {
        &self.cfg
    }

    async fn execute(&self, request: &Request) -> Result<BackendResponse> {
        let body = self.body(request)?;
        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let start = std::time::Instant::now();
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let text = resp.text().await?;

        if !(200..300).contains(&status) {
            let err = self.classify(status, &headers, &text);
            info!(
                backend = %self.cfg.name,
                http_status = status,
                code = err.code().name(),
                duration_ms = start.elapsed().as_millis() as u64,
                "backend request failed"
            );
            return Err(err);
        }

        debug!(
            backend = %self.cfg.name,
            duration_ms = start.elapsed().as_millis() as u64,
            bytes = text.len(),
            "backend request succeeded"
        );
        self.extract_text(&text)
    }

    async fn is_available(&self) -> bool {
        let Some(url) = self.probe_url() else {
            return false;
        };
        // any HTTP answer, even 404, means the host is reachable
        self.client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }
}
