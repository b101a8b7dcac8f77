//! 故障分类码：定义后端调用失败的标准分类及其重试/熔断语义。
//!
//! Failure classification codes for backend calls.
//!
//! Every failure that flows through the orchestration core is mapped onto one
//! [`ErrorCode`]. The code decides two things independently:
//!
//! - whether the retry layer may attempt the call again ([`ErrorCode::retryable`])
//! - whether the failure is charged to the backend's circuit breaker
//!   ([`ErrorCode::counts_against_breaker`])
//!
//! ## Categories
//!
//! | Prefix | Category   | Description                                  |
//! |--------|------------|----------------------------------------------|
//! | F1xxx  | client     | Request-side failures, never retried         |
//! | F2xxx  | rate       | Rate limit and quota failures                |
//! | F3xxx  | server     | Transient backend-side failures              |
//! | F4xxx  | local      | Failures raised by the runtime itself        |
//! | F9xxx  | unknown    | Catch-all                                    |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::error_code::ErrorCode;
//!
//! let code = ErrorCode::from_http_status(429);
//! assert_eq!(code, ErrorCode::RateLimited);
//! assert!(code.retryable());
//! assert!(code.counts_against_breaker());
//!
//! let code = ErrorCode::AdmissionTimeout;
//! assert!(!code.counts_against_breaker());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// F1001: Malformed request or unsupported parameters
    InvalidRequest,
    /// F1002: Invalid, expired, or missing credentials
    Authentication,
    /// F1003: Requested model or endpoint does not exist
    NotFound,
    /// F2001: Request rate limit exceeded
    RateLimited,
    /// F2002: Account quota or billing limit reached
    QuotaExhausted,
    /// F3001: Internal error on the backend side
    ServerError,
    /// F3002: Backend temporarily overloaded or unavailable
    Overloaded,
    /// F3003: Call did not complete within its deadline
    Timeout,
    /// F3004: Connection could not be established or was reset
    Network,
    /// F4001: Circuit breaker rejected the call without contacting the backend
    CircuitOpen,
    /// F4002: No admission permit could be acquired in time
    AdmissionTimeout,
    /// F4003: Call was skipped because the run was cancelled
    Cancelled,
    /// F4004: A stream chunk failed during local processing
    ChunkFailed,
    /// F9999: Failure could not be classified
    Unknown,
}

impl ErrorCode {
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "F1001",
            Self::Authentication => "F1002",
            Self::NotFound => "F1003",
            Self::RateLimited => "F2001",
            Self::QuotaExhausted => "F2002",
            Self::ServerError => "F3001",
            Self::Overloaded => "F3002",
            Self::Timeout => "F3003",
            Self::Network => "F3004",
            Self::CircuitOpen => "F4001",
            Self::AdmissionTimeout => "F4002",
            Self::Cancelled => "F4003",
            Self::ChunkFailed => "F4004",
            Self::Unknown => "F9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::CircuitOpen => "circuit_open",
            Self::AdmissionTimeout => "admission_timeout",
            Self::Cancelled => "cancelled",
            Self::ChunkFailed => "chunk_failed",
            Self::Unknown => "unknown",
        }
    }

    /// Transient failures the retry layer may attempt again.
    ///
    /// `CircuitOpen` is reported as "service unavailable, retryable" to callers,
    /// but the retry layer never spins on an open breaker; see
    /// [`crate::resilience::ResilientCall`].
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ServerError
                | Self::Overloaded
                | Self::Timeout
                | Self::Network
                | Self::CircuitOpen
        )
    }

    /// Whether the failure is evidence that the backend itself misbehaved.
    #[inline]
    pub fn counts_against_breaker(&self) -> bool {
        !matches!(
            self,
            Self::CircuitOpen | Self::AdmissionTimeout | Self::Cancelled | Self::ChunkFailed
        )
    }

    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::Authentication | Self::NotFound => "client",
            Self::RateLimited | Self::QuotaExhausted => "rate",
            Self::ServerError | Self::Overloaded | Self::Timeout | Self::Network => "server",
            Self::CircuitOpen | Self::AdmissionTimeout | Self::Cancelled | Self::ChunkFailed => {
                "local"
            }
            Self::Unknown => "unknown",
        }
    }

    /// Maps a backend-reported error type string onto a code.
    ///
    /// Accepts the standard names plus common provider aliases such as
    /// `"invalid_api_key"`, `"insufficient_quota"` or `"overloaded_error"`.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_request" | "invalid_request_error" | "context_length_exceeded" => {
                Self::InvalidRequest
            }
            "authentication" | "authentication_error" | "invalid_api_key" => Self::Authentication,
            "not_found" | "model_not_found" => Self::NotFound,
            "rate_limited" | "rate_limit_exceeded" | "rate_limit_error" => Self::RateLimited,
            "quota_exhausted" | "insufficient_quota" => Self::QuotaExhausted,
            "server_error" | "api_error" => Self::ServerError,
            "overloaded" | "overloaded_error" | "service_unavailable" => Self::Overloaded,
            "timeout" => Self::Timeout,
            _ => return None,
        };
        Some(code)
    }

    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => Self::InvalidRequest,
            401 | 403 => Self::Authentication,
            404 => Self::NotFound,
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            402 => Self::QuotaExhausted,
            500 | 502 => Self::ServerError,
            503 | 529 => Self::Overloaded,
            s if (500..600).contains(&s) => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(ErrorCode::Timeout.retryable());
        assert!(ErrorCode::RateLimited.retryable());
        assert!(ErrorCode::Overloaded.retryable());
        assert!(!ErrorCode::Authentication.retryable());
        assert!(!ErrorCode::QuotaExhausted.retryable());
        assert!(!ErrorCode::InvalidRequest.retryable());
        assert!(!ErrorCode::AdmissionTimeout.retryable());
    }

    #[test]
    fn test_breaker_accounting() {
        // non-retryable backend failures still trip the breaker
        assert!(ErrorCode::Authentication.counts_against_breaker());
        assert!(ErrorCode::Timeout.counts_against_breaker());
        // the backend was never contacted
        assert!(!ErrorCode::AdmissionTimeout.counts_against_breaker());
        assert!(!ErrorCode::CircuitOpen.counts_against_breaker());
        assert!(!ErrorCode::Cancelled.counts_against_breaker());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::from_http_status(401), ErrorCode::Authentication);
        assert_eq!(ErrorCode::from_http_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_http_status(503), ErrorCode::Overloaded);
        assert_eq!(ErrorCode::from_http_status(599), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from_http_status(418), ErrorCode::Unknown);
    }

    #[test]
    fn test_provider_aliases() {
        assert_eq!(
            ErrorCode::from_provider_code("insufficient_quota"),
            Some(ErrorCode::QuotaExhausted)
        );
        assert_eq!(
            ErrorCode::from_provider_code("overloaded_error"),
            Some(ErrorCode::Overloaded)
        );
        assert_eq!(ErrorCode::from_provider_code("something_else"), None);
    }

    #[test]
    fn test_display_uses_code() {
        assert_eq!(ErrorCode::CircuitOpen.to_string(), "F4001");
        assert_eq!(ErrorCode::ChunkFailed.category(), "local");
    }
}
