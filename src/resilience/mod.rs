//! 弹性模式模块：提供按后端隔离的熔断器、指数退避重试以及二者的组合调用。
//!
//! # Resilience Primitives Module
//!
//! Failure isolation for individual backends. One backend's outage never
//! throttles another's traffic: every backend name gets its own breaker from
//! a [`CircuitBreakerRegistry`] owned by the orchestrator.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Closed / open / half-open state machine |
//! | [`registry`] | One breaker per backend identity |
//! | [`retry`] | Exponential backoff with jitter |
//! | [`call`] | Breaker-gated, retried, per-attempt-timed call |
//!
//! ## Composition order
//!
//! The breaker decides whether an attempt is made at all; the retry policy
//! decides how many attempts are made once the breaker allows it.
//!
//! ```rust
//! use ai_lib_fanout::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, ResilientCall, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let registry = CircuitBreakerRegistry::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_reset_timeout(Duration::from_secs(30)),
//! );
//! let call = ResilientCall::new(registry.get("openai"), RetryPolicy::new().with_max_retries(2))
//!     .with_attempt_timeout(Some(Duration::from_secs(10)));
//! let outcome = call.run(|_attempt| async { Ok::<_, ai_lib_fanout::Error>("hello") }).await;
//! assert_eq!(outcome.attempts, 1);
//! # }
//! ```

pub mod call;
pub mod circuit_breaker;
pub mod registry;
pub mod retry;

pub use call::{CallOutcome, ResilientCall};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use registry::CircuitBreakerRegistry;
pub use retry::RetryPolicy;
