//! 遥测模块：日志订阅器初始化与每次运行统计数据的输出端（StatsSink）。
//!
//! Telemetry Module.
//!
//! Run statistics leave the orchestration core through a [`StatsSink`]; the
//! storage layer that persists them is the embedding application's concern.
//! The default sink discards everything.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`init_tracing`] | Installs a `tracing` fmt subscriber filtered by `RUST_LOG` |
//! | [`StatsSink`] | Trait for run-statistics destinations |
//! | [`NoopStatsSink`] | Default no-op sink |
//! | [`InMemoryStatsSink`] | Bounded in-memory sink for tests and dashboards |
//! | [`LogStatsSink`] | Emits each run as a structured `info!` event |
//! | [`CompositeStatsSink`] | Multi-destination composite sink |

use crate::types::RunStats;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns `false` when a subscriber
/// was already installed, so calling it more than once is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Destination for per-run statistics.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn record(&self, stats: RunStats) -> Result<()>;

    async fn record_batch(&self, batch: Vec<RunStats>) -> Result<()> {
        for s in batch {
            self.record(s).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub struct NoopStatsSink;

#[async_trait]
impl StatsSink for NoopStatsSink {
    async fn record(&self, _stats: RunStats) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn StatsSink> {
    Arc::new(NoopStatsSink)
}

/// Keeps the most recent `max` runs.
pub struct InMemoryStatsSink {
    runs: RwLock<VecDeque<RunStats>>,
    max_runs: usize,
}

impl InMemoryStatsSink {
    pub fn new(max: usize) -> Self {
        Self {
            runs: RwLock::new(VecDeque::new()),
            max_runs: max.max(1),
        }
    }

    pub fn runs(&self) -> Vec<RunStats> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<RunStats> {
        self.runs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    pub fn clear(&self) {
        self.runs.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StatsSink for InMemoryStatsSink {
    async fn record(&self, stats: RunStats) -> Result<()> {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        runs.push_back(stats);
        while runs.len() > self.max_runs {
            runs.pop_front();
        }
        Ok(())
    }
}

pub struct LogStatsSink;

#[async_trait]
impl StatsSink for LogStatsSink {
    async fn record(&self, stats: RunStats) -> Result<()> {
        info!(
            run_id = %stats.run_id,
            mode = %stats.mode,
            slots = stats.slots,
            succeeded = stats.succeeded,
            failed = stats.failed,
            retries = stats.retries,
            wall_ms = stats.wall_ms,
            total_tokens = stats.total_tokens,
            "run stats"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct CompositeStatsSink {
    sinks: Vec<Arc<dyn StatsSink>>,
}

impl CompositeStatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl StatsSink for CompositeStatsSink {
    async fn record(&self, stats: RunStats) -> Result<()> {
        for sink in &self.sinks {
            sink.record(stats.clone()).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}
