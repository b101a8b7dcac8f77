//! # ai-lib-fanout
//!
//! 多后端扇出编排运行时：在并发上限、熔断与重试的保护下，将同一请求分发给多个 AI 后端并聚合、比较结果。
//!
//! Fan-out runtime for AI backends. One logical request goes to many
//! independently fallible engines (cloud endpoints, local model servers,
//! custom endpoints) under bounded concurrency; partial failure is expected
//! and every outcome lands in one aggregate.
//!
//! ## Overview
//!
//! The hard part is not any single call but the layer around many
//! concurrent, unreliable, latency-variable calls:
//!
//! - **Admission control**: a FIFO permit gate caps in-flight calls
//! - **Resilience**: one circuit breaker per backend, retry with backoff, per-attempt timeout
//! - **Aggregation**: results keyed by backend and run index, never by arrival order
//! - **Comparison**: pairwise similarity, completeness and ranking of the successes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_fanout::{FanoutConfig, Request};
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_fanout::Result<()> {
//!     ai_lib_fanout::telemetry::init_tracing("info");
//!     let config = FanoutConfig::load("fanout.yaml")?;
//!     let (orchestrator, backends) = config.build()?;
//!
//!     let aggregate = orchestrator
//!         .run(&Request::new("Explain backpressure in one paragraph"), &backends)
//!         .await?;
//!     println!("{}", aggregate.status_line());
//!     for (slot, reason) in aggregate.failure_reasons() {
//!         println!("{}: {}", slot, reason.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admission`] | Bounded-permit admission controller |
//! | [`resilience`] | Circuit breaker, breaker registry, retry policy, composed call |
//! | [`backend`] | Backend capability contract and adapters |
//! | [`orchestrator`] | Parallel / sequential fan-out and fan-in |
//! | [`compare`] | Similarity, completeness and ranking over an aggregate |
//! | [`cache`] | Generic LRU, compiled-pattern cache, response cache keys |
//! | [`stream`] | Chunked, paginated and streaming collection processing |
//! | [`config`] | YAML/JSON configuration with environment overrides |
//! | [`types`] | Backend config, request, per-slot and aggregate results |
//! | [`telemetry`] | Tracing setup and run-statistics sinks |

pub mod admission;
pub mod backend;
pub mod cache;
pub mod compare;
pub mod config;
pub mod error_code;
pub mod orchestrator;
pub mod resilience;
pub mod stream;
pub mod telemetry;
pub mod types;

// Re-export main types for convenience
pub use admission::{AdmissionController, Permit};
pub use backend::{Backend, BackendCapabilities, BackendFactory};
pub use compare::{ComparisonEngine, ComparisonReport};
pub use config::FanoutConfig;
pub use error_code::ErrorCode;
pub use orchestrator::{ExecutionMode, Orchestrator, OrchestratorBuilder, OrchestratorOptions};
pub use types::{AggregateResult, BackendConfig, BackendResult, Request, RunStats};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
