//! 类型系统模块：定义后端配置、请求、单次结果与聚合结果等核心数据类型。
//!
//! # Types Module
//!
//! Core data model shared by every layer of the fan-out runtime.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`BackendConfig`] | Identity, connection and tuning parameters of one backend |
//! | [`Request`] | Prompt payload shared read-only across all backends of a run |
//! | [`BackendResponse`] | Raw output a backend hands back to the orchestrator |
//! | [`BackendResult`] | Immutable outcome of one (backend, run index) slot |
//! | [`AggregateResult`] | All slots of one run, keyed by backend and run index |
//! | [`RunStats`] | Per-run performance counters for the storage layer |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::types::{BackendConfig, BackendFormat, Request};
//!
//! let backend = BackendConfig::new("local-llama")
//!     .with_endpoint("http://localhost:8080/v1/chat/completions")
//!     .with_model("llama-3.1-8b")
//!     .with_format(BackendFormat::Chat)
//!     .with_temperature(0.2);
//! assert!(backend.validate().is_ok());
//!
//! let request = Request::new("Summarize the release notes")
//!     .with_system("Answer in three bullet points");
//! assert_eq!(request.effective_temperature(&backend), Some(0.2));
//! ```

pub mod config;
pub mod request;
pub mod result;

pub use config::{BackendConfig, BackendFormat, CostClass};
pub use request::Request;
pub use result::{
    AggregateResult, BackendResponse, BackendResult, FailureInfo, RunStats, SlotKey, Usage,
};

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
