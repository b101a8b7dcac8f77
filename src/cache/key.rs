//! Cache key generation.

use crate::types::{BackendConfig, Request};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// SHA-256 fingerprint of one (backend, request) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub backend: Option<String>,
    pub model: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            backend: None,
            model: None,
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

pub struct CacheKeyGenerator {
    include_temperature: bool,
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self {
            include_temperature: true,
            salt: None,
        }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Treat requests differing only in temperature as the same entry.
    pub fn ignore_temperature(mut self) -> Self {
        self.include_temperature = false;
        self
    }

    /// Key for `request` as `backend` would receive it. Overrides are
    /// resolved first, so a request override and the same backend default
    /// produce the same key.
    pub fn generate(&self, backend: &BackendConfig, request: &Request) -> CacheKey {
        let mut parts: BTreeMap<&str, String> = BTreeMap::new();
        parts.insert("backend", backend.name.clone());
        parts.insert("format", format!("{:?}", backend.format));
        if let Some(ref endpoint) = backend.endpoint {
            parts.insert("endpoint", endpoint.clone());
        }
        if let Some(ref model) = backend.model {
            parts.insert("model", model.clone());
        }
        if self.include_temperature {
            if let Some(t) = request.effective_temperature(backend) {
                parts.insert("temperature", format!("{:.2}", t));
            }
        }
        if let Some(n) = request.effective_max_tokens(backend) {
            parts.insert("max_tokens", n.to_string());
        }
        parts.insert("message", request.message.clone());
        if let Some(ref c) = request.context {
            parts.insert("context", c.clone());
        }
        if let Some(ref s) = request.system {
            parts.insert("system", s.clone());
        }
        if let Some(ref s) = self.salt {
            parts.insert("salt", s.clone());
        }

        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        let mut key = CacheKey::new(hash).with_backend(backend.name.clone());
        if let Some(ref m) = backend.model {
            key = key.with_model(m.clone());
        }
        key
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
