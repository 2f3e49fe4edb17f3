//! Bounded retry with exponential backoff for outbound calls.

use std::time::Duration;

/// Whether a failed attempt may be repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    FailTerminal,
}

/// Failure classification the retry loop needs from an outbound call's error type.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
    /// Error recorded when a call runs past `RetryPolicy::call_timeout`.
    fn timed_out() -> Self;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single call; expiry counts as a transient failure.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Handy for tests and for one-shot commands.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Delay before the attempt that follows `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1_u32 << exponent;
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }

    pub fn decide(&self, attempt: u32, transient: bool) -> RetryDecision {
        if transient && attempt < self.max_attempts.max(1) {
            RetryDecision::Retry
        } else {
            RetryDecision::FailTerminal
        }
    }
}
