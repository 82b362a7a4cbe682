//! Retry pacing for the accept loop.
//!
//! A peer that resets or aborts before `accept` completes only costs that one
//! connection, so those errors are retried at once. Anything else (usually
//! `EMFILE`/`ENFILE`) backs off exponentially with jitter until an accept
//! succeeds again.

use std::io;
use std::time::Duration;

use rand::Rng;

/// First delay after a resource error.
pub const DEFAULT_BASE: Duration = Duration::from_millis(5);

/// Longest delay between accept attempts.
pub const DEFAULT_MAX: Duration = Duration::from_secs(1);

/// Failure streak for one accept loop.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    base: Duration,
    max: Duration,
    failures: u32,
}

impl AcceptBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
        }
    }

    /// Consecutive resource errors since the last successful accept.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A connection was accepted; the next error starts from `base` again.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failed accept and return how long to wait before the next one.
    pub fn next_delay(&mut self, error: &io::Error) -> Duration {
        if is_connection_error(error) {
            return Duration::ZERO;
        }
        self.failures = self.failures.saturating_add(1);

        let factor = 2u32.saturating_pow(self.failures - 1);
        let capped = self.base.saturating_mul(factor).min(self.max);

        // Up to 10% extra so listeners sharing an fd limit drift apart.
        let jitter_range = capped.as_millis() as u64 / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };
        capped + Duration::from_millis(jitter)
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX)
    }
}

/// Errors that concern a single half-open connection, not the listener.
pub fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
