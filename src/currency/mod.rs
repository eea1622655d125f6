//! Currency data model and conversion
//!
//! This module contains the money types shared by the conversion service, the
//! formatter and the currency selection logic.

pub mod format;
pub mod selection;
pub mod service;

pub use format::{format_amount, format_money, INVALID_AMOUNT, INVALID_CURRENCY};
pub use selection::{
    locale_default_currency, CurrencySelection, CurrencySelector, SelectionError,
    SelectionSource, SelectionState, DEFAULT_CURRENCY, PREFERENCE_KEY,
};
pub use service::{
    CacheTtls, ConversionQuery, ConversionService, CurrencyListSource, DisplayConversion,
    SupportedCurrencies,
};

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::ClassifiedError;

/// Errors surfaced by currency operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// The caller passed a negative, NaN or infinite amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    /// The caller passed something that is not a three-letter currency code
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrency(String),

    /// The remote call failed after retries
    #[error("Conversion request failed: {0}")]
    Remote(#[from] ClassifiedError),
}

/// Three-letter ISO-style currency code, stored upper-case
///
/// Only the shape is checked here. Whether the code is actually supported is
/// decided by the supported-currency list fetched from the API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parses and normalizes a code (`"usd"` becomes `"USD"`)
    pub fn parse(code: &str) -> Result<Self, ConversionError> {
        let trimmed = code.trim();
        if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(trimmed.to_ascii_uppercase()))
        } else {
            Err(ConversionError::InvalidCurrency(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CurrencyCode {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl AsRef<str> for CurrencyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A non-negative amount in a currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: CurrencyCode,
}

impl Money {
    /// Validates the amount (finite, not negative) and builds the value
    pub fn new(amount: f64, currency: CurrencyCode) -> Result<Self, ConversionError> {
        Ok(Self {
            amount: validate_amount(amount)?,
            currency,
        })
    }
}

/// Rate from one currency to another at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRate {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    /// Units of `to` per unit of `from`
    pub rate: f64,
    pub as_of: DateTime<Utc>,
    pub source: String,
}

/// Result of converting an amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedAmount {
    pub original: Money,
    pub converted: Money,
    pub rate: f64,
    pub as_of: DateTime<Utc>,
}

/// A currency the marketplace accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedCurrency {
    pub code: CurrencyCode,
    pub name: String,
    pub symbol: String,
}

impl SupportedCurrency {
    fn fallback(code: &str, name: &str, symbol: &str) -> Self {
        Self {
            code: CurrencyCode(code.to_string()),
            name: name.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

/// Currencies assumed supported when the list cannot be fetched
pub fn fallback_currencies() -> Vec<SupportedCurrency> {
    vec![
        SupportedCurrency::fallback("USD", "US Dollar", "$"),
        SupportedCurrency::fallback("EUR", "Euro", "€"),
        SupportedCurrency::fallback("GBP", "British Pound", "£"),
        SupportedCurrency::fallback("KES", "Kenyan Shilling", "KSh"),
        SupportedCurrency::fallback("JPY", "Japanese Yen", "¥"),
        SupportedCurrency::fallback("CAD", "Canadian Dollar", "CA$"),
        SupportedCurrency::fallback("AUD", "Australian Dollar", "A$"),
    ]
}

/// Rejects negative and non-finite amounts; folds `-0.0` into `0.0`
pub fn validate_amount(amount: f64) -> Result<f64, ConversionError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(amount + 0.0)
    } else {
        Err(ConversionError::InvalidAmount(amount))
    }
}
