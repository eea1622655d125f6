//! Request executor with per-attempt timeout, classification and retry
//!
//! The executor holds no per-call state, so one instance can be cloned and
//! shared between any number of concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::credentials::{Anonymous, CredentialProvider};
use super::error::{AttemptOutcome, ClassifiedError};
use super::policy::RetryPolicy;
use super::request::ApiRequest;
use crate::clock::{system_clock, Clock};

/// Default per-attempt timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues API requests and retries transient failures
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    /// HTTP client for making requests
    http_client: Client,
    /// Base URL every request path is joined onto
    base_url: String,
    /// Timeout applied to each attempt separately
    timeout: Duration,
    /// Source of the optional bearer token
    credentials: Arc<dyn CredentialProvider>,
    /// Time source for backoff sleeps and attempt timing
    clock: Arc<dyn Clock>,
}

impl RequestExecutor {
    /// Creates an anonymous executor with the default timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            credentials: Arc::new(Anonymous),
            clock: system_clock(),
        }
    }

    /// Uses a preconfigured HTTP client
    pub fn with_client(mut self, http_client: Client) -> Self {
        self.http_client = http_client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Executes `request` under `policy` without external cancellation
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
    ) -> Result<T, ClassifiedError> {
        self.execute_with_cancel(request, policy, &CancellationToken::new())
            .await
    }

    /// Executes `request`, retrying transient failures with backoff
    ///
    /// # Arguments
    /// * `request` - The idempotent request to issue
    /// * `policy` - Retry limits, delays and the retry predicate
    /// * `cancel` - Aborts the in-flight attempt or the backoff sleep when triggered
    ///
    /// # Returns
    /// * `Ok(T)` - The decoded body of the first successful attempt
    /// * `Err(ClassifiedError)` - The failure of the last attempt made, or
    ///   `Cancelled` if the token fired
    ///
    /// At most `policy.max_attempts()` attempts are made. Non-retryable
    /// classifications end the loop after the attempt that produced them.
    pub async fn execute_with_cancel<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<T, ClassifiedError> {
        let backoff = policy.backoff();
        let max_attempts = policy.max_attempts();
        let target = format!("{} {}", request.method, request.url(&self.base_url));
        let mut attempt: u32 = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(ClassifiedError::Cancelled);
            }

            let started = self.clock.now();
            let outcome = self.attempt::<T>(request, cancel).await;
            let elapsed_ms = self.clock.now().saturating_duration_since(started).as_millis() as u64;

            let error = match outcome {
                AttemptOutcome::Success(value) => {
                    debug!(attempt, max_attempts, target = %target, elapsed_ms, "API request succeeded");
                    return Ok(value);
                }
                AttemptOutcome::Failure(ClassifiedError::Cancelled) => {
                    debug!(attempt, target = %target, elapsed_ms, "API request cancelled");
                    return Err(ClassifiedError::Cancelled);
                }
                AttemptOutcome::Failure(error) => error,
            };

            warn!(
                attempt,
                max_attempts,
                target = %target,
                elapsed_ms,
                error = %error,
                "API request attempt failed"
            );

            if attempt >= max_attempts || !policy.is_retryable(&error) {
                return Err(error);
            }

            let delay = backoff.delay(attempt);
            debug!(attempt, target = %target, delay_ms = delay.as_millis() as u64, "backing off before retry");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt, target = %target, "API request cancelled during backoff");
                    return Err(ClassifiedError::Cancelled);
                }
                _ = self.clock.sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    /// Runs a single attempt: build, send, read, decode
    async fn attempt<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> AttemptOutcome<T> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), request.url(&self.base_url))
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = self.credentials.bearer_token() {
            builder = builder.bearer_auth(token);
        }

        let exchange = async {
            let response = builder
                .send()
                .await
                .map_err(|e| ClassifiedError::from_transport(&e, self.timeout))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| ClassifiedError::from_transport(&e, self.timeout))?;
            decode_response::<T>(status, &body)
        };

        // Dropping `exchange` aborts the in-flight request
        tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Failure(ClassifiedError::Cancelled),
            result = exchange => result.into(),
        }
    }
}

/// Decodes a response body according to its status
///
/// 2xx bodies must decode into `T`. Other statuses are decoded as loose JSON
/// only to extract an error message; an undecodable error body still yields a
/// status-based classification so a 5xx HTML page stays retryable.
fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, ClassifiedError> {
    if (200..300).contains(&status) {
        return serde_json::from_str::<T>(body)
            .map_err(|e| ClassifiedError::malformed(e.to_string(), body));
    }

    let payload = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
    Err(ClassifiedError::from_status(status, &payload))
}
