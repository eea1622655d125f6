//! Exponential backoff with bounded upward jitter
//!
//! `delay(n) = min(max_delay, base_delay * 2^(n-1) * (1 + j))` with `j` drawn
//! uniformly from `[0, 0.1)`. Jitter only ever lengthens the wait, so the pure
//! exponential value is a floor (until the ceiling kicks in).

use std::time::Duration;

use rand::Rng;

/// Upper bound (exclusive) of the multiplicative jitter
pub const MAX_JITTER: f64 = 0.1;

/// Cap on the exponent so the multiplication cannot overflow
const MAX_EXPONENT: u32 = 30;

/// Delay schedule between retry attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry `attempt` (1 = the wait before the second attempt)
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..MAX_JITTER);
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay for a given jitter factor, clamped to `[0, MAX_JITTER)`
    ///
    /// The jittered value always stays strictly below `1.1` times the
    /// exponential value, even when `jitter` is `MAX_JITTER` or rounding in
    /// `mul_f64` lands on the bound.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = if jitter.is_finite() {
            jitter.clamp(0.0, MAX_JITTER)
        } else {
            0.0
        };
        let exponential = self.exponential(attempt);
        let bound = exponential.mul_f64(1.0 + MAX_JITTER);
        let mut jittered = exponential.mul_f64(1.0 + jitter);
        if jitter > 0.0 && jittered >= bound {
            // one nanosecond under the exclusive bound
            jittered = bound.saturating_sub(Duration::from_nanos(1)).max(exponential);
        }
        jittered.min(self.max_delay)
    }

    /// Pure exponential value `base_delay * 2^(attempt-1)`, saturating at the ceiling
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay.max(self.base_delay))
    }
}
