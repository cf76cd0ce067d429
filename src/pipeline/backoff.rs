//! Pure retry decisions: no I/O, no clock, no record content.

use crate::runtime::broker::ErrorClass;
use std::time::Duration;

pub(crate) const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Outcome of one retry decision. Computed fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the attempt after waiting the given backoff.
    Retry { after: Duration },
    /// Stop retrying; the unit is handed to the dead-letter sink.
    GiveUp,
}

/// Stateless retry/backoff policy.
///
/// The backoff for attempt `n` (0-indexed) is
/// `min(initial_delay * multiplier^n, max_delay)`. With `max_attempts == 0`
/// every failure dead-letters immediately; with `multiplier == 1.0` the delay
/// is fixed at `initial_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    multiplier: f64,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    /// Overrides the growth factor. Values below 1.0 are clamped to 1.0 so
    /// backoff stays monotonically non-decreasing in the attempt number.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier < 1.0 { 1.0 } else { multiplier };
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on the total time a unit can spend in backoff waits.
    pub fn max_total_backoff(&self) -> Duration {
        self.max_delay.saturating_mul(self.max_attempts)
    }

    /// Decides whether a failed attempt should be retried.
    ///
    /// A `Permanent` classification gives up immediately regardless of the
    /// attempt count; otherwise the policy gives up once `attempt` reaches
    /// `max_attempts`.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if class == ErrorClass::Permanent || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            after: self.backoff_for(attempt),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * factor;
        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs >= max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}
