//! 准入控制模块：基于有界许可的并发闸门，先来先服务并支持等待超时。
//!
//! # Admission Control Module
//!
//! [`AdmissionController`] caps how many backend calls (or processing chunks)
//! may be in flight at once. It wraps a fair `tokio::sync::Semaphore`:
//! waiters are queued FIFO and woken one at a time as permits come back.
//!
//! - A [`Permit`] is released when it is dropped, so every exit path of the
//!   holder (early return, `?`, panic unwind) gives it back exactly once.
//! - `acquire(Some(timeout))` leaves the queue when the deadline passes and
//!   reports [`Error::AdmissionTimeout`].
//! - `outstanding + available == max` holds at every observation because
//!   `outstanding` is derived from the semaphore itself.
//!
//! ```rust
//! use ai_lib_fanout::admission::AdmissionController;
//! use std::time::Duration;
//!
//! # async fn demo() -> ai_lib_fanout::Result<()> {
//! let gate = AdmissionController::new(2)?;
//! let answer = gate
//!     .execute(|| async { 40 + 2 }, Some(Duration::from_secs(1)))
//!     .await?;
//! assert_eq!(answer, 42);
//! assert_eq!(gate.snapshot().outstanding, 0);
//! # Ok(())
//! # }
//! ```

use crate::{Error, ErrorContext, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Point-in-time view of an admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub max: usize,
    pub available: usize,
    pub outstanding: usize,
    /// Callers currently queued for a permit.
    pub waiting: usize,
    pub peak_outstanding: usize,
    pub total_acquired: u64,
    pub total_timeouts: u64,
}

impl AdmissionSnapshot {
    /// Fraction of permits currently held (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.outstanding as f64 / self.max as f64
        }
    }
}

struct Inner {
    semaphore: Arc<Semaphore>,
    max: usize,
    waiting: AtomicUsize,
    peak: AtomicUsize,
    total_acquired: AtomicU64,
    total_timeouts: AtomicU64,
}

impl Inner {
    fn outstanding(&self) -> usize {
        self.max.saturating_sub(self.semaphore.available_permits())
    }

    fn on_acquired(&self) {
        self.total_acquired.fetch_add(1, Ordering::Relaxed);
        self.peak.fetch_max(self.outstanding(), Ordering::Relaxed);
    }
}

/// Bounded-permit gate. Cloning shares the same permit pool.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

/// One unit of admission. Returned to its controller on drop.
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    permit: Option<OwnedSemaphorePermit>,
    owner: Arc<Inner>,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("held", &self.permit.is_some())
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        // semaphore permit goes back here; the waiter at the head of the queue wakes
        self.permit.take();
    }
}

/// Keeps the queue-depth counter honest when an acquire future is dropped.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl AdmissionController {
    pub fn new(max_permits: usize) -> Result<Self> {
        if max_permits == 0 || max_permits > Semaphore::MAX_PERMITS {
            return Err(Error::configuration_with_context(
                format!("max_permits must be in 1..={}", Semaphore::MAX_PERMITS),
                ErrorContext::new()
                    .with_field_path("max_concurrency")
                    .with_details(format!("got {}", max_permits))
                    .with_source("admission"),
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_permits)),
                max: max_permits,
                waiting: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                total_acquired: AtomicU64::new(0),
                total_timeouts: AtomicU64::new(0),
            }),
        })
    }

    pub fn max_permits(&self) -> usize {
        self.inner.max
    }

    /// Take a permit without waiting.
    pub fn try_acquire(&self) -> Option<Permit> {
        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        self.inner.on_acquired();
        Some(self.wrap(permit))
    }

    /// Wait (FIFO) for a permit, optionally bounded by `timeout`.
    pub async fn acquire(&self, timeout: Option<Duration>) -> Result<Permit> {
        if let Some(p) = self.try_acquire() {
            return Ok(p);
        }

        let started = Instant::now();
        let _queued = WaitGuard::enter(&self.inner.waiting);
        let fut = self.inner.semaphore.clone().acquire_owned();
        let acquired = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(res) => res,
                Err(_) => {
                    self.inner.total_timeouts.fetch_add(1, Ordering::Relaxed);
                    let waited_ms = started.elapsed().as_millis() as u64;
                    warn!(waited_ms, max = self.inner.max, "admission timed out");
                    return Err(Error::AdmissionTimeout { waited_ms });
                }
            },
            None => fut.await,
        };
        let permit = acquired.map_err(|_| {
            Error::runtime_with_context(
                "admission controller closed",
                ErrorContext::new().with_source("admission"),
            )
        })?;
        self.inner.on_acquired();
        debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            outstanding = self.inner.outstanding(),
            "admission granted after wait"
        );
        Ok(self.wrap(permit))
    }

    /// Hand a permit back explicitly.
    ///
    /// Dropping the permit does the same thing; this form exists to detect a
    /// permit being returned to a controller that never issued it.
    pub fn release(&self, mut permit: Permit) -> Result<()> {
        if !Arc::ptr_eq(&permit.owner, &self.inner) {
            // still goes back to its real owner when dropped
            return Err(Error::runtime_with_context(
                "permit released into a controller that did not issue it",
                ErrorContext::new().with_source("admission"),
            ));
        }
        permit.permit.take();
        Ok(())
    }

    /// Acquire, run `f`, release on every exit path.
    pub async fn execute<F, Fut, T>(&self, f: F, timeout: Option<Duration>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire(timeout).await?;
        Ok(f().await)
    }

    /// Reject all current and future waiters. Held permits stay valid.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let available = self.inner.semaphore.available_permits().min(self.inner.max);
        AdmissionSnapshot {
            max: self.inner.max,
            available,
            outstanding: self.inner.max - available,
            waiting: self.inner.waiting.load(Ordering::Relaxed),
            peak_outstanding: self.inner.peak.load(Ordering::Relaxed),
            total_acquired: self.inner.total_acquired.load(Ordering::Relaxed),
            total_timeouts: self.inner.total_timeouts.load(Ordering::Relaxed),
        }
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> Permit {
        Permit {
            permit: Some(permit),
            owner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_zero_permits_rejected() {
        assert!(matches!(
            AdmissionController::new(0),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_never_exceeds_max_permits() {
        let gate = AdmissionController::new(3).unwrap();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _p = gate.acquire(None).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        let snap = gate.snapshot();
        assert_eq!(snap.outstanding, 0);
        assert_eq!(snap.available, 3);
        assert_eq!(snap.total_acquired, 40);
        assert!(snap.peak_outstanding <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_fifo() {
        let gate = AdmissionController::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = gate.acquire(None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _p = gate.acquire(None).await.unwrap();
                order.lock().unwrap().push(i);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            // let task i enqueue before task i+1 is spawned
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(gate.snapshot().waiting, 5);

        drop(held);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_timeout_leaves_queue() {
        let gate = AdmissionController::new(1).unwrap();
        let _held = gate.acquire(None).await.unwrap();

        let err = gate
            .acquire(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AdmissionTimeout { .. }));

        let snap = gate.snapshot();
        assert_eq!(snap.waiting, 0);
        assert_eq!(snap.total_timeouts, 1);
        assert_eq!(snap.outstanding, 1);
    }

    #[tokio::test]
    async fn test_release_into_foreign_controller_is_detected() {
        let a = AdmissionController::new(1).unwrap();
        let b = AdmissionController::new(1).unwrap();
        let p = a.acquire(None).await.unwrap();

        assert!(b.release(p).is_err());
        // the permit still went home to `a`
        assert_eq!(a.snapshot().available, 1);
        assert_eq!(b.snapshot().available, 1);

        let p = a.acquire(None).await.unwrap();
        assert_eq!(a.snapshot().outstanding, 1);
        a.release(p).unwrap();
        assert_eq!(a.snapshot().outstanding, 0);
    }

    #[tokio::test]
    async fn test_execute_releases_on_panic() {
        let gate = AdmissionController::new(2).unwrap();
        let g = gate.clone();
        let joined = tokio::spawn(async move {
            g.execute(|| async { panic!("backend exploded") }, None)
                .await
                .ok();
        })
        .await;
        assert!(joined.is_err());
        assert_eq!(gate.snapshot().outstanding, 0);

        let out = gate.execute(|| async { "ok" }, None).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(gate.snapshot().available, 2);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let gate = AdmissionController::new(1).unwrap();
        let _held = gate.acquire(None).await.unwrap();
        gate.close();
        assert!(gate.is_closed());
        assert!(matches!(
            gate.acquire(None).await,
            Err(Error::Runtime { .. })
        ));
    }

    #[test]
    fn test_utilization() {
        let gate = AdmissionController::new(4).unwrap();
        let _a = gate.try_acquire().unwrap();
        let snap = gate.snapshot();
        assert_eq!(snap.outstanding + snap.available, snap.max);
        assert!((snap.utilization() - 0.25).abs() < f64::EPSILON);
    }
}
