use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_ms: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Milliseconds since the last counted failure.
    pub last_failure_ago_ms: Option<u64>,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub trips: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Successes needed while half-open before closing again
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the cooldown duration
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Alias for with_cooldown for API consistency
    pub fn with_reset_timeout(self, timeout: Duration) -> Self {
        self.with_cooldown(timeout)
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    trips: u64,
}

/// Per-backend circuit breaker.
///
/// Legal transitions: closed -> open (failure threshold reached),
/// open -> half-open (first call after the cooldown), half-open -> closed
/// (success threshold reached), half-open -> open (any failure).
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                next_attempt: None,
                trips: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // counters stay consistent under poisoning: every update is a single assignment
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Gate one call. Moves open -> half-open once the cooldown has elapsed.
    pub fn allow(&self) -> Result<()> {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let now = Instant::now();
                match st.next_attempt {
                    Some(at) if now < at => Err(Error::CircuitOpen {
                        backend: self.name.clone(),
                        retry_in_ms: (at - now).as_millis() as u64,
                    }),
                    _ => {
                        st.state = CircuitState::HalfOpen;
                        st.consecutive_successes = 0;
                        info!(backend = %self.name, "circuit half-open, probing");
                        Ok(())
                    }
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.lock();
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                st.consecutive_successes = st.consecutive_successes.saturating_add(1);
                if st.consecutive_successes >= self.cfg.success_threshold {
                    st.state = CircuitState::Closed;
                    st.consecutive_failures = 0;
                    st.consecutive_successes = 0;
                    st.next_attempt = None;
                    info!(backend = %self.name, "circuit closed");
                }
            }
            // a call admitted before the trip finished late; no transition
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut st = self.lock();
        let now = Instant::now();
        st.last_failure = Some(now);
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    self.trip(&mut st, now);
                }
            }
            CircuitState::HalfOpen => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                self.trip(&mut st, now);
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, st: &mut State, now: Instant) {
        st.state = CircuitState::Open;
        st.consecutive_successes = 0;
        st.next_attempt = Some(now + self.cfg.cooldown);
        st.trips += 1;
        warn!(
            backend = %self.name,
            failures = st.consecutive_failures,
            cooldown_ms = self.cfg.cooldown.as_millis() as u64,
            "circuit opened"
        );
    }

    /// Current state. Does not advance open -> half-open; only `allow` does.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `f` through the breaker, recording its outcome.
    ///
    /// Failures whose classification says the backend was never contacted
    /// are not charged to the breaker.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.allow()?;
        let res = f().await;
        match &res {
            Ok(_) => self.on_success(),
            Err(e) if e.counts_against_breaker() => self.on_failure(),
            Err(_) => {}
        }
        res
    }

    /// Force the breaker back to closed with all counters cleared.
    pub fn reset(&self) {
        let mut st = self.lock();
        st.state = CircuitState::Closed;
        st.consecutive_failures = 0;
        st.consecutive_successes = 0;
        st.next_attempt = None;
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = Instant::now();
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.next_attempt) {
            (CircuitState::Open, Some(at)) if at > now => Some((at - now).as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: st.state,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            cooldown_ms: self.cfg.cooldown.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            consecutive_successes: st.consecutive_successes,
            last_failure_ago_ms: st
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            open_remaining_ms,
            trips: st.trips,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_code::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn breaker(failures: u32, successes: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::new()
                .with_failure_threshold(failures)
                .with_success_threshold(successes)
                .with_cooldown(Duration::from_millis(cooldown_ms)),
        )
    }

    #[test]
    fn test_circuit_breaker_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 2);
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_config_serde_uses_millis() {
        let cfg: CircuitBreakerConfig =
            serde_yaml::from_str("failure_threshold: 2\ncooldown_ms: 1500\n").unwrap();
        assert_eq!(cfg.failure_threshold, 2);
        assert_eq!(cfg.success_threshold, 2);
        assert_eq!(cfg.cooldown, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failures() {
        let cb = breaker(5, 1, 100);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.snapshot().consecutive_failures, 2);
        cb.on_success();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_exact_threshold() {
        let cb = breaker(3, 1, 100);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().is_ok());

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let err = cb.allow().unwrap_err();
        assert!(matches!(err, Error::CircuitOpen { .. }));
        assert!(cb.snapshot().open_remaining_ms.is_some());
        assert_eq!(cb.snapshot().trips, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking() {
        let cb = breaker(1, 1, 1_000);
        cb.on_failure();
        let calls = AtomicU32::new(0);
        let res: Result<()> = cb
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_before_call_resolves() {
        let cb = Arc::new(breaker(1, 1, 50));
        cb.on_failure();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let probe = cb.clone();
        let observed = cb
            .call(|| async move { Ok::<_, Error>(probe.state()) })
            .await
            .unwrap();
        assert_eq!(observed, CircuitState::HalfOpen);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_regardless_of_successes() {
        let cb = breaker(2, 3, 50);
        cb.on_failure();
        cb.on_failure();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cb.allow().is_ok());
        cb.on_success();
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.allow().is_err());
        assert_eq!(cb.snapshot().trips, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(1, 2, 50);
        cb.on_failure();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cb.allow().is_ok());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        let snap = cb.snapshot();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncharged_failures_do_not_trip() {
        let cb = breaker(1, 1, 50);
        let res: Result<()> = cb
            .call(|| async { Err(Error::AdmissionTimeout { waited_ms: 1 }) })
            .await;
        assert!(res.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);

        let res: Result<()> = cb
            .call(|| async { Err(Error::backend("test", ErrorCode::Authentication, "no")) })
            .await;
        assert!(res.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let cb = breaker(1, 1, 10_000);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow().is_ok());
    }

    #[test]
    fn test_circuit_breaker_thread_safe() {
        let cb = Arc::new(breaker(1_000, 1, 10));
        let mut handles = vec![];
        for _ in 0..10 {
            let cb = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || {
                for _ in 0..5 {
                    cb.on_failure();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.snapshot().consecutive_failures, 50);
    }
}
