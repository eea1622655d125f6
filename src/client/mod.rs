//! Resilient access to the marketplace API
//!
//! [`RequestExecutor`] issues requests with a per-attempt timeout, classifies
//! every failure into a [`ClassifiedError`] and retries transient ones under a
//! [`RetryPolicy`] with exponential, jittered backoff.

mod backoff;
mod credentials;
mod error;
mod executor;
mod policy;
mod request;

pub use backoff::{BackoffPolicy, MAX_JITTER};
pub use credentials::{Anonymous, CredentialProvider, StaticCredentials};
pub use error::{AttemptOutcome, ClassifiedError};
pub use executor::{RequestExecutor, DEFAULT_TIMEOUT};
pub use policy::{
    default_is_retryable, PolicyError, RetryPolicy, RetryPredicate, DEFAULT_BASE_DELAY,
    DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
};
pub use request::ApiRequest;
