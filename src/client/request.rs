//! Description of a call to the marketplace API

use std::fmt;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

/// An idempotent API request, relative to the executor's base URL
///
/// The request is plain data so it can be re-issued unchanged on every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// POST with a JSON body
    ///
    /// Falls back to `null` if `body` cannot be represented as JSON, which only
    /// happens for maps with non-string keys.
    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(serde_json::to_value(body).unwrap_or(Value::Null)),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Joins the path onto `base_url` without doubling or dropping slashes
    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}
