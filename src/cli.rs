//! Command-line interface parsing for carfx
//!
//! This module handles parsing of CLI arguments using clap. Global flags
//! override the environment configuration; each subcommand maps onto one
//! conversion service operation.

use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::currency::{ConversionError, ConversionQuery};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// A batch item was not of the form `AMOUNT:FROM:TO`
    #[error("Invalid batch item: '{0}'. Expected AMOUNT:FROM:TO, e.g. 100:USD:EUR")]
    InvalidBatchItem(String),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// carfx - currency conversion for the car marketplace API
#[derive(Parser, Debug)]
#[command(name = "carfx")]
#[command(about = "Exchange rates, conversions and display currency for the car marketplace")]
#[command(version)]
pub struct Cli {
    /// Base URL of the marketplace API (overrides CARFX_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Per-attempt timeout in milliseconds (overrides CARFX_TIMEOUT_MS)
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt (overrides CARFX_MAX_RETRIES)
    #[arg(long, global = true, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Locale used to infer a default currency, e.g. en-KE
    #[arg(long, global = true, value_name = "LOCALE")]
    pub locale: Option<String>,

    /// Log at debug level unless CARFX_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Show the exchange rate between two currencies
    Rate { from: String, to: String },

    /// Convert an amount, falling back to the unconverted amount on failure
    Convert {
        amount: f64,
        from: String,
        to: String,
    },

    /// Convert several amounts in one request
    ///
    /// Examples:
    ///   carfx batch 100:USD:EUR 2500:KES:USD
    Batch {
        #[arg(required = true, value_name = "AMOUNT:FROM:TO")]
        items: Vec<String>,
    },

    /// List supported currencies
    Currencies,

    /// Format an amount locally without contacting the API
    Format { amount: f64, currency: String },

    /// Show the display currency, or change it with --set
    Currency {
        #[arg(long, value_name = "CODE")]
        set: Option<String>,
    },
}

impl Cli {
    /// Applies the global flag overrides to `config`
    ///
    /// # Arguments
    /// * `config` - Configuration loaded from the environment
    ///
    /// # Returns
    /// * `Ok(())` if every override is valid
    /// * `Err(CliError::Config)` for a malformed URL or a zero timeout
    pub fn apply_overrides(&self, config: &mut Config) -> Result<(), CliError> {
        if let Some(url) = &self.api_url {
            config.set_api_url(url.as_str())?;
        }
        if let Some(ms) = self.timeout_ms {
            if ms == 0 {
                return Err(ConfigError::Zero {
                    name: "--timeout-ms",
                }
                .into());
            }
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        Ok(())
    }
}

/// Parses a batch item of the form `AMOUNT:FROM:TO`
///
/// # Arguments
/// * `s` - The item string from the command line
///
/// # Returns
/// * `Ok(ConversionQuery)` if the item is well formed and valid
/// * `Err(CliError::InvalidBatchItem)` if the shape or amount is wrong
/// * `Err(CliError::Conversion)` if a currency code is invalid
pub fn parse_batch_item(s: &str) -> Result<ConversionQuery, CliError> {
    let parts: Vec<&str> = s.split(':').collect();
    let [amount, from, to] = parts.as_slice() else {
        return Err(CliError::InvalidBatchItem(s.to_string()));
    };
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidBatchItem(s.to_string()))?;

    Ok(ConversionQuery::parse(amount, from, to)?)
}
