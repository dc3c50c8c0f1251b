//! Failure-isolation state machine guarding all distributed tier calls.
//!
//! A saturated or unreachable distributed tier must not amplify latency
//! and errors across every cache caller. After enough consecutive
//! failures the breaker opens and rejects calls outright; after a cooldown
//! it lets a bounded number of probes through, and only a run of probe
//! successes closes it again.

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Consecutive failures that open the breaker.
const FAILURE_THRESHOLD: u32 = 5;

/// Cooldown before an open breaker permits probes.
const RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Probe budget per half-open window, and the consecutive-success count
/// required to close.
const HALF_OPEN_MAX_ATTEMPTS: u32 = 3;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    half_open_attempts: u32,
    half_open_successes: u32,
    next_retry_at: Option<Instant>,
}

impl BreakerInner {
    fn open(&mut self, reset_timeout: Duration) {
        self.state = BreakerState::Open;
        self.next_retry_at = Some(Instant::now() + reset_timeout);
        self.half_open_attempts = 0;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.half_open_attempts = 0;
        self.half_open_successes = 0;
        self.next_retry_at = None;
    }
}

/// A serializable point-in-time view of the breaker, for health reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub half_open_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

/// Three-state circuit breaker, shared process-wide.
///
/// State is mutated only through `is_open`, `record_success` and
/// `record_failure`; all three are safe under concurrent callers.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    /// Creates a breaker with production thresholds (5 failures, 30 s
    /// cooldown, 3 half-open probes).
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(FAILURE_THRESHOLD, RESET_TIMEOUT, HALF_OPEN_MAX_ATTEMPTS)
    }

    /// Creates a breaker with custom thresholds.
    #[must_use]
    pub fn with_settings(
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_max_attempts: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                half_open_attempts: 0,
                half_open_successes: 0,
                next_retry_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            half_open_max_attempts: half_open_max_attempts.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether calls must be rejected right now.
    ///
    /// This is also where the lazy `Open → HalfOpen` transition happens:
    /// the first check at or past the retry deadline flips the breaker to
    /// half-open, no background timer involved. In half-open, each
    /// permitted check consumes one probe from the window's budget;
    /// exhausting the budget rejects further calls until a recorded result
    /// moves the state.
    pub fn is_open(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                let due = inner
                    .next_retry_at
                    .is_none_or(|retry_at| Instant::now() >= retry_at);
                if due {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_attempts = 1;
                    inner.half_open_successes = 0;
                    tracing::info!("circuit breaker half-open, probing distributed tier");
                    false
                } else {
                    true
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_attempts >= self.half_open_max_attempts {
                    true
                } else {
                    inner.half_open_attempts += 1;
                    false
                }
            }
        }
    }

    /// Records a successful distributed call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_max_attempts {
                    tracing::info!("circuit breaker closed after successful probes");
                    inner.close();
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed distributed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    tracing::warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened, rejecting distributed tier calls"
                    );
                    inner.open(self.reset_timeout);
                }
            }
            BreakerState::HalfOpen => {
                tracing::warn!("probe failed, circuit breaker re-opened");
                inner.open(self.reset_timeout);
            }
            BreakerState::Open => {
                inner.next_retry_at = Some(Instant::now() + self.reset_timeout);
            }
        }
    }

    /// Current state without consuming a half-open probe.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Point-in-time view for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_attempts: inner.half_open_attempts,
            retry_in_ms: inner.next_retry_at.and_then(|retry_at| {
                retry_at
                    .checked_duration_since(Instant::now())
                    .map(|d| d.as_millis() as u64)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::with_settings(5, Duration::from_millis(50), 3)
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = fast_breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_lazy_half_open_after_timeout() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        std::thread::sleep(Duration::from_millis(60));
        // First check past the deadline permits a probe.
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_consecutive_successes() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        for _ in 0..3 {
            assert!(!breaker.is_open());
            breaker.record_success();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.is_open());
    }

    #[test]
    fn test_half_open_probe_budget() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));

        // Three probes permitted, then rejected until a result lands.
        assert!(!breaker.is_open());
        assert!(!breaker.is_open());
        assert!(!breaker.is_open());
        assert!(breaker.is_open());
        assert!(breaker.is_open());
    }

    #[test]
    fn test_snapshot() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        let snap = breaker.snapshot();
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.failure_count, 5);
        assert!(snap.retry_in_ms.is_some());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"], "open");
    }
}
