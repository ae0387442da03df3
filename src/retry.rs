//! Backoff strategies for listener restarts and claim retries
//!
//! Listener restarts default to a flat delay; claim retries use capped
//! exponential backoff with a bounded attempt count.

use std::time::Duration;

use tracing::debug;

use crate::error::SubmissionFailure;

/// Delay schedule indexed by attempt (0-indexed)
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// `initial * multiplier^attempt`, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::from_secs(5))
    }
}

impl Backoff {
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            initial,
            max,
            multiplier: 2.0,
        }
    }

    /// Calculate the delay before attempt `attempt + 1`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                let capped = secs.min(max.as_secs_f64());
                if capped.is_finite() {
                    Duration::from_secs_f64(capped)
                } else {
                    *max
                }
            }
        }
    }

    /// Smallest delay this schedule can produce
    pub fn floor(&self) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { initial, max, .. } => (*initial).min(*max),
        }
    }
}

/// Bounded retry policy for claim submissions
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for ClaimRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::exponential(Duration::from_secs(2), Duration::from_secs(30)),
        }
    }
}

impl ClaimRetryPolicy {
    /// Decide whether to resend after `failure`, given how many retries were
    /// already made. Returns the delay before the next attempt.
    pub fn next_delay(&self, failure: &SubmissionFailure, retries_so_far: u32) -> Option<Duration> {
        if !failure.retryable {
            debug!(kind = %failure.kind, "Non-retryable claim failure");
            return None;
        }
        if retries_so_far >= self.max_retries {
            debug!(
                retries = retries_so_far,
                max = self.max_retries,
                "Claim retry budget exhausted"
            );
            return None;
        }
        Some(self.backoff.delay_for_attempt(retries_so_far))
    }
}
