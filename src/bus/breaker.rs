//! Dispatch circuit breaker.
//!
//! Repeated subscriber failures stop event dispatch entirely for a recovery
//! window instead of letting a crashing callback burn CPU and log bandwidth
//! on every tick. Publishes are still accepted while the breaker is open —
//! only dispatch is suspended.

use log::{info, warn};

pub struct CircuitBreaker {
    /// Consecutive dispatch errors that open the breaker.
    threshold: u32,
    /// Milliseconds the breaker stays open before auto-closing.
    recovery_ms: u64,
    consecutive_errors: u32,
    /// Monotonic timestamp the breaker opened, `None` while closed.
    opened_at_ms: Option<u64>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_ms: u64) -> Self {
        Self {
            threshold,
            recovery_ms,
            consecutive_errors: 0,
            opened_at_ms: None,
        }
    }

    /// Record one handler failure. Opens the breaker when the consecutive
    /// error count reaches the threshold.
    pub fn record_error(&mut self, now_ms: u64) {
        if self.opened_at_ms.is_some() {
            return;
        }
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.threshold {
            warn!(
                "Breaker: open after {} consecutive dispatch errors ({}ms recovery)",
                self.consecutive_errors, self.recovery_ms
            );
            self.opened_at_ms = Some(now_ms);
        }
    }

    /// Record one successful handler invocation; resets the consecutive
    /// error count while closed.
    pub fn record_success(&mut self) {
        if self.opened_at_ms.is_none() {
            self.consecutive_errors = 0;
        }
    }

    /// Whether dispatch may proceed. Auto-closes (and zeroes the counter)
    /// once the recovery window has elapsed.
    pub fn allow_dispatch(&mut self, now_ms: u64) -> bool {
        match self.opened_at_ms {
            None => true,
            Some(opened) => {
                if now_ms.saturating_sub(opened) >= self.recovery_ms {
                    info!("Breaker: recovery window elapsed, closing");
                    self.opened_at_ms = None;
                    self.consecutive_errors = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at_ms.is_some()
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}
