//! Retry policy configuration
//!
//! A [`RetryPolicy`] is immutable once built. It bounds how many times a call is
//! repeated, how long the executor waits between attempts and which
//! classifications are worth repeating at all.

use std::time::Duration;

use thiserror::Error;

use super::backoff::BackoffPolicy;
use super::error::ClassifiedError;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the second attempt
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for any single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Predicate deciding whether a classified failure should be retried
pub type RetryPredicate = fn(&ClassifiedError) -> bool;

/// Errors raised when a policy is built with inconsistent values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The base delay must be strictly positive
    #[error("Base delay must be greater than zero")]
    ZeroBaseDelay,

    /// The ceiling must not be lower than the base delay
    #[error("Max delay ({max_ms}ms) must be at least the base delay ({base_ms}ms)")]
    MaxBelowBase { base_ms: u128, max_ms: u128 },
}

/// Immutable retry configuration
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    is_retryable: RetryPredicate,
}

/// Default retry predicate: timeouts, connection failures and any 5xx
///
/// Client errors and malformed responses will fail the same way again, and
/// cancellation is the caller's decision, so none of those are retried.
pub fn default_is_retryable(error: &ClassifiedError) -> bool {
    error.is_transient()
}

impl RetryPolicy {
    /// Creates a policy using the default retry predicate
    ///
    /// # Returns
    /// * `Ok(RetryPolicy)` when `base_delay > 0` and `max_delay >= base_delay`
    /// * `Err(PolicyError)` otherwise
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    ) -> Result<Self, PolicyError> {
        if base_delay.is_zero() {
            return Err(PolicyError::ZeroBaseDelay);
        }
        if max_delay < base_delay {
            return Err(PolicyError::MaxBelowBase {
                base_ms: base_delay.as_millis(),
                max_ms: max_delay.as_millis(),
            });
        }
        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
            is_retryable: default_is_retryable,
        })
    }

    /// Replaces the retry predicate
    pub fn with_predicate(mut self, is_retryable: RetryPredicate) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    /// A policy that never retries
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound on attempts, first attempt included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether `error` qualifies for another attempt under this policy
    ///
    /// The predicate can only narrow the transient set: client errors,
    /// malformed responses and cancellation are never retried, whatever the
    /// predicate says.
    pub fn is_retryable(&self, error: &ClassifiedError) -> bool {
        error.is_transient() && (self.is_retryable)(error)
    }

    /// Backoff schedule derived from this policy's delays
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            is_retryable: default_is_retryable,
        }
    }
}
