//! Circuit Breaker (component J).
//!
//! Closed/Open/HalfOpen state machine guarding provider control-plane calls.
//! Grounded on the same retry-on-transient-error idiom used elsewhere in
//! this codebase for flaky remote calls, generalized into the full
//! three-state breaker this design requires.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::protocol_constants::{
    CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_HALF_OPEN_SUCCESS_THRESHOLD, CIRCUIT_OPEN_TIMEOUT,
    CIRCUIT_RESET_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call is currently permitted, and if not, a retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Circuit breaker state machine (§4.J).
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_timeout: Duration,
    half_open_success_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
            failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            open_timeout: CIRCUIT_OPEN_TIMEOUT,
            half_open_success_threshold: CIRCUIT_HALF_OPEN_SUCCESS_THRESHOLD,
            reset_timeout: CIRCUIT_RESET_TIMEOUT,
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Call before attempting a guarded operation. Transitions Open →
    /// HalfOpen when `open_timeout` has elapsed since the last failure.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::HalfOpen => Admission::Allowed,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.open_timeout);
                if elapsed > self.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        retry_after: self.open_timeout - elapsed,
                    }
                }
            }
        }
    }

    /// Records a successful guarded call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                if let Some(last_failure) = inner.last_failure_at {
                    if last_failure.elapsed() > self.reset_timeout {
                        inner.failure_count = 0;
                        inner.last_failure_at = None;
                    }
                }
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.half_open_success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Records a failed guarded call. Classification of transient-vs-not
    /// happens upstream (§4.J "classifies transient errors by string
    /// match"); only transient failures should reach this method.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.success_count = 0;
            }
            BreakerState::Open => {}
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies a control-plane error message as transient by matching common
/// network-failure signals, per §4.J.
#[must_use]
pub fn is_transient_signal(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["timeout", "timed out", "connection reset", "429", "econnreset"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new();
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            assert_eq!(breaker.admit(), Admission::Allowed);
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.admit(), Admission::Rejected { .. }));
    }

    #[test]
    fn half_open_requires_consecutive_successes_to_close() {
        let breaker = CircuitBreaker::new();
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Force past the open timeout by manipulating elapsed time is not
        // directly possible without a fake clock; instead verify the
        // single-success-does-not-close behavior via direct state mutation
        // semantics exposed through record_success in HalfOpen.
        {
            let mut inner = breaker.inner.lock();
            inner.state = BreakerState::HalfOpen;
            inner.success_count = 0;
        }
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new();
        {
            let mut inner = breaker.inner.lock();
            inner.state = BreakerState::HalfOpen;
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn transient_signal_matching() {
        assert!(is_transient_signal("connection reset by peer"));
        assert!(is_transient_signal("request timed out"));
        assert!(is_transient_signal("HTTP 429 Too Many Requests"));
        assert!(!is_transient_signal("invalid credentials"));
    }
}
