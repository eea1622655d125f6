//! Failure taxonomy for remote API calls
//!
//! Every failed attempt is reduced to a [`ClassifiedError`]. The classification
//! decides whether the executor retries: transient kinds (timeout, connection
//! failure, 5xx) may succeed on a second try, terminal kinds (4xx, undecodable
//! body) will not.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Maximum number of characters of a raw body kept for diagnostics
const BODY_EXCERPT_CHARS: usize = 200;

/// A failed remote call, classified by cause
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassifiedError {
    /// The attempt did not complete within its per-attempt timeout
    #[error("Request timed out after {}ms: {message}", timeout.as_millis())]
    Timeout { timeout: Duration, message: String },

    /// No response was received (DNS, refused connection, reset, ...)
    #[error("Connection failed: {message}")]
    ConnectionFailure { message: String },

    /// The server answered with a 5xx status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The server answered with a non-2xx, non-5xx status
    #[error("Client error {status}: {message}")]
    ClientError { status: u16, message: String },

    /// The body could not be decoded into the expected shape
    #[error("Malformed response: {message} (body: {excerpt})")]
    MalformedResponse { message: String, excerpt: String },

    /// The caller cancelled the call
    #[error("Request cancelled")]
    Cancelled,
}

impl ClassifiedError {
    /// Whether the failure may resolve itself if the identical request is repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClassifiedError::Timeout { .. }
                | ClassifiedError::ConnectionFailure { .. }
                | ClassifiedError::ServerError { .. }
        )
    }

    /// HTTP status carried by the failure, if the server responded
    pub fn status(&self) -> Option<u16> {
        match self {
            ClassifiedError::ServerError { status, .. }
            | ClassifiedError::ClientError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Builds a malformed-response error from a decoding failure and the raw body
    pub fn malformed(message: impl Into<String>, body: &str) -> Self {
        ClassifiedError::MalformedResponse {
            message: message.into(),
            excerpt: body_excerpt(body),
        }
    }

    /// Classifies a transport-level failure reported by reqwest
    pub fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ClassifiedError::Timeout {
                timeout,
                message: err.to_string(),
            }
        } else {
            ClassifiedError::ConnectionFailure {
                message: err.to_string(),
            }
        }
    }

    /// Classifies a non-2xx response using its decoded body
    pub fn from_status(status: u16, body: &Value) -> Self {
        let message = error_message(body).unwrap_or_else(|| synthesize_message(status));
        if (500..600).contains(&status) {
            ClassifiedError::ServerError { status, message }
        } else {
            ClassifiedError::ClientError { status, message }
        }
    }
}

/// Result of a single attempt
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Failure(ClassifiedError),
}

impl<T> AttemptOutcome<T> {
    pub fn into_result(self) -> Result<T, ClassifiedError> {
        match self {
            AttemptOutcome::Success(value) => Ok(value),
            AttemptOutcome::Failure(err) => Err(err),
        }
    }
}

impl<T> From<Result<T, ClassifiedError>> for AttemptOutcome<T> {
    fn from(result: Result<T, ClassifiedError>) -> Self {
        match result {
            Ok(value) => AttemptOutcome::Success(value),
            Err(err) => AttemptOutcome::Failure(err),
        }
    }
}

/// Pulls a human-readable message out of a structured error payload
///
/// Looks at `message`, then `error` (string or `{ "message": ... }`), then `detail`.
fn error_message(body: &Value) -> Option<String> {
    let object = body.as_object()?;
    for field in ["message", "error", "detail"] {
        match object.get(field) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                return Some(text.trim().to_string())
            }
            Some(nested @ Value::Object(_)) => {
                if let Some(text) = error_message(nested) {
                    return Some(text);
                }
            }
            _ => {}
        }
    }
    None
}

fn synthesize_message(status: u16) -> String {
    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("HTTP {} {}", status, reason),
        None => format!("HTTP {}", status),
    }
}

/// Truncates a raw body on a character boundary
fn body_excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    let mut excerpt: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
    excerpt.push('…');
    excerpt
}
