//! Runtime configuration from the environment
//!
//! All settings come from `CARFX_*` variables, optionally loaded from a
//! `.env` file. Command-line flags override individual values afterwards.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::client::{
    PolicyError, RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES,
    DEFAULT_TIMEOUT,
};
use crate::currency::CacheTtls;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be an http(s) URL, got '{value}'")]
    InvalidUrl { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },

    #[error("Invalid retry settings: {0}")]
    Policy(#[from] PolicyError),
}

/// Client settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub cache_ttls: CacheTtls,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            cache_ttls: CacheTtls::default(),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source
    ///
    /// Unset or blank variables keep their defaults; set but unparsable ones
    /// are errors rather than being silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let api_url = match var("CARFX_API_URL") {
            Some(url) => validate_url("CARFX_API_URL", url)?,
            None => defaults.api_url,
        };

        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(var(name)
                .map(|v| parse_number(name, &v))
                .transpose()?
                .map(Duration::from_millis)
                .unwrap_or(default))
        };
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(var(name)
                .map(|v| parse_number(name, &v))
                .transpose()?
                .map(Duration::from_secs)
                .unwrap_or(default))
        };

        let timeout = millis("CARFX_TIMEOUT_MS", defaults.timeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "CARFX_TIMEOUT_MS",
            });
        }

        let max_retries = match var("CARFX_MAX_RETRIES") {
            Some(v) => u32::try_from(parse_number("CARFX_MAX_RETRIES", &v)?).map_err(|_| {
                ConfigError::InvalidNumber {
                    name: "CARFX_MAX_RETRIES",
                    value: v.clone(),
                }
            })?,
            None => defaults.max_retries,
        };

        let config = Self {
            api_url,
            api_token: var("CARFX_API_TOKEN"),
            timeout,
            max_retries,
            base_delay: millis("CARFX_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: millis("CARFX_MAX_DELAY_MS", defaults.max_delay)?,
            cache_ttls: CacheTtls {
                rates: secs("CARFX_RATE_TTL_SECS", defaults.cache_ttls.rates)?,
                conversions: secs("CARFX_CONVERSION_TTL_SECS", defaults.cache_ttls.conversions)?,
                currencies: secs("CARFX_CURRENCIES_TTL_SECS", defaults.cache_ttls.currencies)?,
            },
        };

        // Surface bad delay combinations at startup, not on first request
        config.retry_policy()?;
        Ok(config)
    }

    /// Retry policy built from the configured limits
    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::new(
            self.max_retries,
            self.base_delay,
            self.max_delay,
        )?)
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        self.cache_ttls
    }

    /// Replaces the API URL after validating it
    pub fn set_api_url(&mut self, url: impl Into<String>) -> Result<(), ConfigError> {
        self.api_url = validate_url("--api-url", url.into())?;
        Ok(())
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

fn validate_url(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::InvalidUrl { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cache_ttls().currencies, Duration::from_secs(3600));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = load(&[
            ("CARFX_API_URL", "https://api.example.com/v1/"),
            ("CARFX_API_TOKEN", "secret"),
            ("CARFX_TIMEOUT_MS", "2500"),
            ("CARFX_MAX_RETRIES", "0"),
            ("CARFX_BASE_DELAY_MS", "200"),
            ("CARFX_MAX_DELAY_MS", "800"),
            ("CARFX_RATE_TTL_SECS", "60"),
            ("CARFX_CONVERSION_TTL_SECS", "30"),
            ("CARFX_CURRENCIES_TTL_SECS", "120"),
        ])
        .unwrap();

        assert_eq!(config.api_url, "https://api.example.com/v1");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_policy().unwrap().max_attempts(), 1);
        assert_eq!(config.cache_ttls.rates, Duration::from_secs(60));
        assert_eq!(config.cache_ttls.conversions, Duration::from_secs(30));
        assert_eq!(config.cache_ttls.currencies, Duration::from_secs(120));
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = load(&[("CARFX_API_TOKEN", "  "), ("CARFX_TIMEOUT_MS", "")]).unwrap();
        assert!(config.api_token.is_none());
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_rejects_unparsable_number() {
        let err = load(&[("CARFX_MAX_RETRIES", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                name: "CARFX_MAX_RETRIES",
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        assert!(matches!(
            load(&[("CARFX_TIMEOUT_MS", "0")]),
            Err(ConfigError::Zero { .. })
        ));
    }

    #[test]
    fn test_rejects_max_delay_below_base() {
        let err = load(&[("CARFX_BASE_DELAY_MS", "5000"), ("CARFX_MAX_DELAY_MS", "1000")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Policy(_)));
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            load(&[("CARFX_API_URL", "ftp://example.com")]),
            Err(ConfigError::InvalidUrl { .. })
        ));

        let mut config = Config::default();
        assert!(config.set_api_url("localhost:3000").is_err());
        config.set_api_url("http://127.0.0.1:9000/").unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:9000");
    }
}
