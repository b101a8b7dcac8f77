//! 分块处理模块：将大型内存集合切分为固定大小的块，在并发上限内处理，支持分页与流式消费。
//!
//! # Chunked Stream/Page Processor
//!
//! Splits a collection into fixed-size chunks and processes them under a
//! concurrency bound. Two consumption modes:
//!
//! - **Paginated**: [`ChunkProcessor::page`] by number, or
//!   [`ChunkProcessor::page_after`] with an opaque [`PageCursor`].
//! - **Streaming**: [`ChunkProcessor::stream`] yields one [`ChunkOutcome`]
//!   per chunk, in chunk order, lazily. Calling it again restarts from the
//!   first chunk.
//!
//! A failing chunk is recorded as a [`ChunkError`] and the run continues.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_fanout::stream::ChunkProcessor;
//!
//! # async fn demo() -> ai_lib_fanout::Result<()> {
//! let lines: Vec<String> = (0..1_000).map(|i| format!("line {}", i)).collect();
//! let processor = ChunkProcessor::new(lines, 100)?.with_concurrency(4);
//! let report = processor
//!     .process_all(|chunk| async move { Ok(chunk.items.iter().filter(|l| l.ends_with('7')).count()) })
//!     .await;
//! assert_eq!(report.outputs.iter().sum::<usize>(), 100);
//! assert_eq!(report.metrics.chunks_processed, 10);
//! # Ok(())
//! # }
//! ```

use crate::admission::AdmissionController;
use crate::error_code::ErrorCode;
use crate::{Error, ErrorContext, Result};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

/// One fixed-size slice of the collection.
#[derive(Debug)]
pub struct Chunk<'a, T> {
    pub index: usize,
    /// Position of the first item in the whole collection.
    pub offset: usize,
    pub items: &'a [T],
}

impl<T> Clone for Chunk<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Chunk<'_, T> {}

/// Why a chunk produced no output.
///
/// `code` is [`ErrorCode::ChunkFailed`] when the work itself failed and
/// [`ErrorCode::AdmissionTimeout`] when the chunk never got a permit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("chunk {index} failed: {message}")]
pub struct ChunkError {
    pub index: usize,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug)]
pub struct ChunkOutcome<R> {
    pub index: usize,
    pub items: usize,
    pub result: std::result::Result<R, ChunkError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingMetrics {
    pub items_total: usize,
    pub items_processed: usize,
    pub chunks_total: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub peak_in_flight_chunks: usize,
    /// Peak in-flight items times the item size; payload behind pointers
    /// is not counted.
    pub peak_memory_bytes: usize,
    pub elapsed_ms: u64,
    pub errors: Vec<ChunkError>,
}

/// Ordered results of [`ChunkProcessor::process_all`].
#[derive(Debug)]
pub struct ProcessingReport<R> {
    /// Outputs of successful chunks, in chunk order.
    pub outputs: Vec<R>,
    pub errors: Vec<ChunkError>,
    pub metrics: ProcessingMetrics,
}

impl<R> ProcessingReport<R> {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Opaque resume point for cursor paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageCursor {
    offset: usize,
}

impl PageCursor {
    pub fn token(&self) -> String {
        format!("o{:x}", self.offset)
    }

    pub fn from_token(token: &str) -> Result<Self> {
        token
            .strip_prefix('o')
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .map(|offset| Self { offset })
            .ok_or_else(|| {
                Error::validation_with_context(
                    "malformed page cursor",
                    ErrorContext::new()
                        .with_field_path("cursor")
                        .with_details(token.to_string()),
                )
            })
    }
}

#[derive(Debug)]
pub struct Page<'a, T> {
    /// 0-based page number; for cursor pages, the offset divided by size.
    pub number: usize,
    pub size: usize,
    pub items: &'a [T],
    pub total_items: usize,
    pub total_pages: usize,
    pub next_cursor: Option<PageCursor>,
}

impl<T> Page<'_, T> {
    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}

struct RunRecorder {
    metrics: Mutex<ProcessingMetrics>,
    in_flight_chunks: AtomicUsize,
    in_flight_items: AtomicUsize,
    item_bytes: usize,
    started: Instant,
}

impl RunRecorder {
    fn new(items_total: usize, chunks_total: usize, item_bytes: usize) -> Self {
        Self {
            metrics: Mutex::new(ProcessingMetrics {
                items_total,
                chunks_total,
                ..Default::default()
            }),
            in_flight_chunks: AtomicUsize::new(0),
            in_flight_items: AtomicUsize::new(0),
            item_bytes,
            started: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProcessingMetrics> {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enter(&self, items: usize) {
        let chunks = self.in_flight_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.in_flight_items.fetch_add(items, Ordering::SeqCst) + items;
        let mut m = self.lock();
        m.peak_in_flight_chunks = m.peak_in_flight_chunks.max(chunks);
        m.peak_memory_bytes = m.peak_memory_bytes.max(live * self.item_bytes);
    }

    fn exit(&self, items: usize, failure: Option<ChunkError>) {
        self.in_flight_chunks.fetch_sub(1, Ordering::SeqCst);
        self.in_flight_items.fetch_sub(items, Ordering::SeqCst);
        let mut m = self.lock();
        match failure {
            None => {
                m.chunks_processed += 1;
                m.items_processed += items;
            }
            Some(err) => {
                m.chunks_failed += 1;
                m.errors.push(err);
            }
        }
        m.elapsed_ms = self.started.elapsed().as_millis() as u64;
    }

    /// Failure before the chunk started running.
    fn reject(&self, err: ChunkError) {
        let mut m = self.lock();
        m.chunks_failed += 1;
        m.errors.push(err);
        m.elapsed_ms = self.started.elapsed().as_millis() as u64;
    }

    fn snapshot(&self) -> ProcessingMetrics {
        self.lock().clone()
    }
}

fn chunk_error(index: usize, code: ErrorCode, err: &Error) -> ChunkError {
    warn!(chunk = index, code = code.code(), error = %err, "chunk failed");
    ChunkError {
        index,
        code,
        message: err.to_string(),
    }
}

/// Chunked, concurrency-bounded processor over an owned collection.
pub struct ChunkProcessor<T> {
    items: Vec<T>,
    chunk_size: usize,
    concurrency: usize,
    admission: Option<AdmissionController>,
    last_run: Mutex<Option<Arc<RunRecorder>>>,
}

impl<T> ChunkProcessor<T> {
    pub fn new(items: Vec<T>, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::configuration_with_context(
                "chunk size must be at least 1",
                ErrorContext::new()
                    .with_field_path("chunk_size")
                    .with_source("chunk_processor"),
            ));
        }
        Ok(Self {
            items,
            chunk_size,
            concurrency: 1,
            admission: None,
            last_run: Mutex::new(None),
        })
    }

    /// Chunks processed at once (at least 1).
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Also take a permit from a shared gate for every chunk, so chunk work
    /// competes with other admitted work.
    pub fn with_admission(mut self, controller: AdmissionController) -> Self {
        self.admission = Some(controller);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.items.len().div_ceil(self.chunk_size)
    }

    /// Lazy, finite pass over the chunks; each call starts from the first.
    pub fn chunks(&self) -> impl Iterator<Item = Chunk<'_, T>> + '_ {
        let size = self.chunk_size;
        self.items
            .chunks(size)
            .enumerate()
            .map(move |(index, items)| Chunk {
                index,
                offset: index * size,
                items,
            })
    }

    fn slice_page(&self, offset: usize, size: usize) -> Result<Page<'_, T>> {
        if size == 0 {
            return Err(Error::validation_with_context(
                "page size must be at least 1",
                ErrorContext::new().with_field_path("size"),
            ));
        }
        let total = self.items.len();
        let start = offset.min(total);
        let end = start.saturating_add(size).min(total);
        Ok(Page {
            number: start / size,
            size,
            items: &self.items[start..end],
            total_items: total,
            total_pages: total.div_ceil(size),
            next_cursor: (end < total).then_some(PageCursor { offset: end }),
        })
    }

    /// Page `number` (0-based) of `size` items. Past the end yields an
    /// empty page.
    pub fn page(&self, number: usize, size: usize) -> Result<Page<'_, T>> {
        self.slice_page(number.saturating_mul(size), size)
    }

    /// The page starting at `cursor`, or the first page when `None`.
    pub fn page_after(&self, cursor: Option<&PageCursor>, size: usize) -> Result<Page<'_, T>> {
        self.slice_page(cursor.map(|c| c.offset).unwrap_or(0), size)
    }

    /// Metrics of the current or most recent processing run.
    pub fn metrics(&self) -> ProcessingMetrics {
        self.last_run
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|r| r.snapshot())
            .unwrap_or_else(|| ProcessingMetrics {
                items_total: self.items.len(),
                chunks_total: self.chunk_count(),
                ..Default::default()
            })
    }

    fn begin_run(&self) -> Arc<RunRecorder> {
        let recorder = Arc::new(RunRecorder::new(
            self.items.len(),
            self.chunk_count(),
            mem::size_of::<T>(),
        ));
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(recorder.clone());
        recorder
    }

    /// Process every chunk with `f`, yielding outcomes in chunk order.
    ///
    /// At most `concurrency` chunks run at once. Nothing runs until the
    /// stream is polled.
    pub fn stream<'a, F, Fut, R>(&'a self, f: F) -> impl Stream<Item = ChunkOutcome<R>> + 'a
    where
        F: Fn(Chunk<'a, T>) -> Fut + 'a,
        Fut: Future<Output = Result<R>> + 'a,
        R: 'a,
    {
        let recorder = self.begin_run();
        debug!(
            items = self.items.len(),
            chunks = self.chunk_count(),
            concurrency = self.concurrency,
            "chunk run started"
        );
        let admission = self.admission.clone();
        stream::iter(self.chunks())
            .map(move |chunk| {
                let index = chunk.index;
                let len = chunk.items.len();
                let rec = recorder.clone();
                let admission = admission.clone();
                let work = f(chunk);
                async move {
                    let _permit = match admission {
                        Some(ref gate) => match gate.acquire(None).await {
                            Ok(p) => Some(p),
                            Err(e) => {
                                let err = chunk_error(index, ErrorCode::AdmissionTimeout, &e);
                                rec.reject(err.clone());
                                return ChunkOutcome {
                                    index,
                                    items: len,
                                    result: Err(err),
                                };
                            }
                        },
                        None => None,
                    };
                    rec.enter(len);
                    let result = match work.await {
                        Ok(value) => {
                            rec.exit(len, None);
                            Ok(value)
                        }
                        Err(e) => {
                            let err = chunk_error(index, ErrorCode::ChunkFailed, &e);
                            rec.exit(len, Some(err.clone()));
                            Err(err)
                        }
                    };
                    ChunkOutcome {
                        index,
                        items: len,
                        result,
                    }
                }
            })
            .buffered(self.concurrency)
    }

    /// Run every chunk and collect successful outputs in chunk order.
    pub async fn process_all<'a, F, Fut, R>(&'a self, f: F) -> ProcessingReport<R>
    where
        F: Fn(Chunk<'a, T>) -> Fut + 'a,
        Fut: Future<Output = Result<R>> + 'a,
        R: 'a,
    {
        let outcomes: Vec<ChunkOutcome<R>> = self.stream(f).collect().await;
        let mut outputs = Vec::with_capacity(outcomes.len());
        let mut errors = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(v) => outputs.push(v),
                Err(e) => errors.push(e),
            }
        }
        let metrics = self.metrics();
        debug!(
            chunks = metrics.chunks_processed,
            failed = metrics.chunks_failed,
            elapsed_ms = metrics.elapsed_ms,
            "chunk run finished"
        );
        ProcessingReport {
            outputs,
            errors,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn numbers(n: usize) -> Vec<u32> {
        (0..n as u32).collect()
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(ChunkProcessor::new(numbers(3), 0).is_err());
    }

    #[test]
    fn test_chunks_are_restartable() {
        let p = ChunkProcessor::new(numbers(10), 4).unwrap();
        assert_eq!(p.chunk_count(), 3);
        let first: Vec<usize> = p.chunks().map(|c| c.items.len()).collect();
        let again: Vec<usize> = p.chunks().map(|c| c.offset).collect();
        assert_eq!(first, vec![4, 4, 2]);
        assert_eq!(again, vec![0, 4, 8]);
    }

    #[test]
    fn test_offset_paging() {
        let p = ChunkProcessor::new(numbers(10), 4).unwrap();
        let page = p.page(1, 4).unwrap();
        assert_eq!(page.items, &[4, 5, 6, 7]);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next());
        let last = p.page(2, 4).unwrap();
        assert_eq!(last.items, &[8, 9]);
        assert!(!last.has_next());
        assert!(p.page(9, 4).unwrap().items.is_empty());
        assert!(p.page(0, 0).is_err());
    }

    #[test]
    fn test_cursor_paging_walks_everything() {
        let p = ChunkProcessor::new(numbers(7), 2).unwrap();
        let mut seen = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = p.page_after(cursor.as_ref(), 3).unwrap();
            seen.extend_from_slice(page.items);
            match page.next_cursor {
                // round-trip through the opaque token like a remote caller would
                Some(c) => cursor = Some(PageCursor::from_token(&c.token()).unwrap()),
                None => break,
            }
        }
        assert_eq!(seen, numbers(7));
        assert!(PageCursor::from_token("garbage").is_err());
    }

    #[tokio::test]
    async fn test_failing_chunk_is_isolated() {
        let p = ChunkProcessor::new(numbers(10), 2).unwrap().with_concurrency(3);
        let report = p
            .process_all(|chunk| async move {
                if chunk.index == 2 {
                    Err(Error::runtime("bad chunk"))
                } else {
                    Ok(chunk.items.iter().sum::<u32>())
                }
            })
            .await;
        assert_eq!(report.outputs, vec![1, 5, 13, 17]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].index, 2);
        assert_eq!(report.errors[0].code, ErrorCode::ChunkFailed);
        assert!(!report.is_clean());
        assert_eq!(report.metrics.chunks_processed, 4);
        assert_eq!(report.metrics.chunks_failed, 1);
        assert_eq!(report.metrics.items_processed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_and_order() {
        let p = ChunkProcessor::new(numbers(12), 2).unwrap().with_concurrency(2);
        let outcomes: Vec<ChunkOutcome<usize>> = p
            .stream(|chunk| async move {
                // later chunks finish first
                tokio::time::sleep(Duration::from_millis(100 - chunk.index as u64 * 10)).await;
                Ok(chunk.index)
            })
            .collect()
            .await;
        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
        let m = p.metrics();
        assert_eq!(m.peak_in_flight_chunks, 2);
        assert_eq!(m.peak_memory_bytes, 4 * mem::size_of::<u32>());
    }

    #[tokio::test]
    async fn test_stream_is_lazy_and_restartable() {
        let p = ChunkProcessor::new(numbers(4), 2).unwrap();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let s = p.stream(move |chunk| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(chunk.index)
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let first: Vec<_> = s.collect().await;
        assert_eq!(first.len(), 2);

        let again: Vec<_> = p
            .stream(|chunk| async move { Ok(chunk.index) })
            .map(|o| o.result.unwrap())
            .collect()
            .await;
        assert_eq!(again, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_shared_admission_gate() {
        let gate = AdmissionController::new(1).unwrap();
        let p = ChunkProcessor::new(numbers(6), 2)
            .unwrap()
            .with_concurrency(3)
            .with_admission(gate.clone());
        let report = p.process_all(|chunk| async move { Ok(chunk.items.len()) }).await;
        assert_eq!(report.outputs, vec![2, 2, 2]);
        assert_eq!(gate.snapshot().peak_outstanding, 1);
    }

    #[tokio::test]
    async fn test_unadmitted_chunks_carry_admission_code() {
        let gate = AdmissionController::new(1).unwrap();
        gate.close();
        let p = ChunkProcessor::new(numbers(4), 2)
            .unwrap()
            .with_admission(gate);
        let report = p.process_all(|chunk| async move { Ok(chunk.items.len()) }).await;
        assert!(report.outputs.is_empty());
        let codes: Vec<ErrorCode> = report.errors.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![ErrorCode::AdmissionTimeout; 2]);
        assert_eq!(report.metrics.chunks_failed, 2);
        assert_eq!(report.metrics.items_processed, 0);
    }
}
