use crate::error_code::ErrorCode;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "backends[1].endpoint")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "admission", "options_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the fan-out runtime.
///
/// Backend-level failures are captured into results instead of being thrown
/// out of a run; only configuration problems surface as `Err` from
/// [`crate::Orchestrator::run`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend '{backend}' failed ({code}/{}): {message}", .code.name())]
    Backend {
        backend: String,
        code: ErrorCode,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Circuit open for backend '{backend}', retry in {retry_in_ms}ms")]
    CircuitOpen { backend: String, retry_in_ms: u64 },

    #[error("Admission timeout after {waited_ms}ms")]
    AdmissionTimeout { waited_ms: u64 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::new())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_with_context(msg, ErrorContext::new())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Backend failure with an explicit classification.
    pub fn backend(backend: impl Into<String>, code: ErrorCode, msg: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            code,
            message: msg.into(),
            retry_after_ms: None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Classification used by the retry and circuit breaker layers.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Backend { code, .. } => *code,
            Error::CircuitOpen { .. } => ErrorCode::CircuitOpen,
            Error::AdmissionTimeout { .. } => ErrorCode::AdmissionTimeout,
            Error::Cancelled(_) => ErrorCode::Cancelled,
            Error::Transport(e) => {
                if e.is_timeout() {
                    ErrorCode::Timeout
                } else if let Some(status) = e.status() {
                    ErrorCode::from_http_status(status.as_u16())
                } else if e.is_connect() || e.is_request() {
                    ErrorCode::Network
                } else {
                    ErrorCode::Unknown
                }
            }
            Error::Configuration { .. } | Error::Validation { .. } => ErrorCode::InvalidRequest,
            Error::Serialization(_) | Error::Yaml(_) => ErrorCode::InvalidRequest,
            Error::Io(_) => ErrorCode::Network,
            Error::Runtime { .. } => ErrorCode::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().retryable()
    }

    pub fn counts_against_breaker(&self) -> bool {
        self.code().counts_against_breaker()
    }

    /// Server-suggested delay before the next attempt, if any.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Error::Backend { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }
}
