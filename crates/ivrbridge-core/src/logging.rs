//! Rate-limited verbose logging channel (component M).
//!
//! Per-frame and per-chunk chatter (frame validation detail, keepalive ticks,
//! quality-gate scores) goes through [`VerboseLimiter`] rather than straight
//! to `log::debug!`, so steady-state traffic under load doesn't drown out
//! everything else. `warn!`/`error!` are always emitted directly and never
//! pass through this limiter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token-bucket rate limiter keyed by a `&'static str` message template.
///
/// Each template gets its own independent bucket, so a noisy template never
/// starves another. Not a global sampler.
pub struct VerboseLimiter {
    period: Duration,
    last_emit: Mutex<HashMap<&'static str, Instant>>,
}

impl VerboseLimiter {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a line for `template` should be emitted now, and
    /// records that it was.
    pub fn allow(&self, template: &'static str) -> bool {
        let now = Instant::now();
        let mut last_emit = self.last_emit.lock();
        match last_emit.get(template) {
            Some(last) if now.duration_since(*last) < self.period => false,
            _ => {
                last_emit.insert(template, now);
                true
            }
        }
    }
}

impl Default for VerboseLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Logs at debug level if `template`'s bucket in `limiter` allows it.
#[macro_export]
macro_rules! verbose_log {
    ($limiter:expr, $template:expr, $($arg:tt)*) => {
        if $limiter.allow($template) {
            log::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_always_allowed() {
        let limiter = VerboseLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow("frame.validated"));
    }

    #[test]
    fn second_call_within_period_suppressed() {
        let limiter = VerboseLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow("frame.validated"));
        assert!(!limiter.allow("frame.validated"));
    }

    #[test]
    fn independent_templates_do_not_interfere() {
        let limiter = VerboseLimiter::new(Duration::from_secs(60));
        assert!(limiter.allow("frame.validated"));
        assert!(limiter.allow("keepalive.tick"));
    }

    #[test]
    fn allowed_again_after_period_elapses() {
        let limiter = VerboseLimiter::new(Duration::from_millis(5));
        assert!(limiter.allow("frame.validated"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(limiter.allow("frame.validated"));
    }
}
