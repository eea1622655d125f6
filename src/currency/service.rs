//! Currency conversion service
//!
//! Wraps every remote call in a [`TtlCache`] and degrades instead of failing:
//! a conversion that cannot reach the API is displayed as the original amount
//! under the target currency's formatting, and a supported-currency list that
//! cannot be fetched is replaced by the last known list or a built-in one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::format::{format_amount, format_money};
use super::{
    fallback_currencies, validate_amount, ConversionError, ConvertedAmount, CurrencyCode,
    ExchangeRate, Money, SupportedCurrency,
};
use crate::cache::TtlCache;
use crate::client::{ApiRequest, ClassifiedError, RequestExecutor, RetryPolicy};
use crate::clock::{system_clock, Clock};

const RATE_PATH: &str = "/currency/rate";
const CONVERT_PATH: &str = "/currency/convert";
const BATCH_CONVERT_PATH: &str = "/currency/convert/batch";
const SUPPORTED_PATH: &str = "/currency/supported";

/// Source label used when the API does not name one
const DEFAULT_RATE_SOURCE: &str = "api";

/// Freshness windows for each cached operation family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub rates: Duration,
    pub conversions: Duration,
    pub currencies: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            rates: Duration::from_secs(300),       // 5 minutes
            conversions: Duration::from_secs(300), // 5 minutes
            currencies: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// A validated conversion request
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionQuery {
    pub amount: f64,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
}

impl ConversionQuery {
    /// Validates raw caller input before any I/O
    pub fn parse(amount: f64, from: &str, to: &str) -> Result<Self, ConversionError> {
        Ok(Self {
            amount: validate_amount(amount)?,
            from: CurrencyCode::parse(from)?,
            to: CurrencyCode::parse(to)?,
        })
    }

    fn is_identity(&self) -> bool {
        self.from == self.to
    }

    fn cache_key(&self) -> ConversionKey {
        ConversionKey {
            amount_bits: self.amount.to_bits(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

/// Conversion cache key: the exact amount plus both currencies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConversionKey {
    amount_bits: u64,
    from: CurrencyCode,
    to: CurrencyCode,
}

/// Where a supported-currency list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyListSource {
    /// Fetched from the API by this call
    Remote,
    /// Served from a fresh cache entry
    Cached,
    /// Fetch failed; served from an expired cache entry
    Stale,
    /// Fetch failed and nothing was cached; built-in list
    Fallback,
}

/// A supported-currency list with provenance
#[derive(Debug, Clone, PartialEq)]
pub struct SupportedCurrencies {
    pub currencies: Vec<SupportedCurrency>,
    pub source: CurrencyListSource,
    /// The fetch failure behind a `Stale` or `Fallback` list
    pub error: Option<ClassifiedError>,
}

impl SupportedCurrencies {
    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.currencies.iter().any(|c| &c.code == code)
    }
}

/// Best-effort conversion for display
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayConversion {
    /// Text to show: the converted amount, or the original amount formatted
    /// in the target currency when conversion failed
    pub text: String,
    pub conversion: Option<ConvertedAmount>,
    /// Soft failure signal; the text is still displayable
    pub error: Option<ClassifiedError>,
}

impl DisplayConversion {
    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateResponse {
    rate: f64,
    as_of: Option<DateTime<Utc>>,
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertResponse {
    converted_amount: f64,
    rate: f64,
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct BatchItem<'a> {
    amount: f64,
    from: &'a str,
    to: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    conversions: Vec<BatchItem<'a>>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<ConvertResponse>,
}

#[derive(Debug, Deserialize)]
struct SupportedResponse {
    currencies: Vec<SupportedCurrency>,
}

/// Converts and formats amounts through the marketplace API
///
/// The service owns one cache per operation family. Construct one per
/// application (or per test); nothing is shared implicitly.
#[derive(Debug)]
pub struct ConversionService {
    executor: RequestExecutor,
    policy: RetryPolicy,
    ttls: CacheTtls,
    rates: TtlCache<(CurrencyCode, CurrencyCode), ExchangeRate>,
    conversions: TtlCache<ConversionKey, ConvertedAmount>,
    currencies: TtlCache<(), Vec<SupportedCurrency>>,
    shutdown: CancellationToken,
}

impl ConversionService {
    /// Creates a service with default TTLs and the system clock
    pub fn new(executor: RequestExecutor, policy: RetryPolicy) -> Self {
        Self::with_settings(executor, policy, CacheTtls::default(), system_clock())
    }

    /// Creates a service with explicit TTLs and cache clock
    pub fn with_settings(
        executor: RequestExecutor,
        policy: RetryPolicy,
        ttls: CacheTtls,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            policy,
            ttls,
            rates: TtlCache::with_clock(ttls.rates, Arc::clone(&clock)),
            conversions: TtlCache::with_clock(ttls.conversions, Arc::clone(&clock)),
            currencies: TtlCache::with_clock(ttls.currencies, clock),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cancels every in-flight and future remote call made by this service
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Looks up the exchange rate from `from` to `to`
    ///
    /// Identical currencies short-circuit to a rate of 1 with no I/O.
    pub async fn get_rate(&self, from: &str, to: &str) -> Result<ExchangeRate, ConversionError> {
        let from = CurrencyCode::parse(from)?;
        let to = CurrencyCode::parse(to)?;

        if from == to {
            return Ok(ExchangeRate {
                from,
                to,
                rate: 1.0,
                as_of: Utc::now(),
                source: "identity".to_string(),
            });
        }

        let key = (from.clone(), to.clone());
        let rate = self
            .rates
            .get_or_compute(key, self.ttls.rates, || self.fetch_rate(&from, &to))
            .await?;
        Ok(rate)
    }

    /// Converts `amount` from `from` to `to`
    ///
    /// # Returns
    /// * `Ok(ConvertedAmount)` - Identity result for equal currencies (no cache,
    ///   no network), otherwise the cached or freshly fetched conversion
    /// * `Err(ConversionError::InvalidAmount | InvalidCurrency)` - Bad arguments,
    ///   detected before any I/O
    /// * `Err(ConversionError::Remote)` - The API call failed after retries
    pub async fn convert(
        &self,
        amount: f64,
        from: &str,
        to: &str,
    ) -> Result<ConvertedAmount, ConversionError> {
        let query = ConversionQuery::parse(amount, from, to)?;
        self.convert_query(&query).await
    }

    /// Converts an already validated query
    ///
    /// Codes outside the supported set are rejected with
    /// `ConversionError::InvalidCurrency` before any conversion request is
    /// built.
    pub async fn convert_query(
        &self,
        query: &ConversionQuery,
    ) -> Result<ConvertedAmount, ConversionError> {
        if query.is_identity() {
            return Ok(identity_conversion(query));
        }

        let key = query.cache_key();
        let converted = self
            .conversions
            .get_or_compute(key, self.ttls.conversions, || self.fetch_conversion(query))
            .await?;
        Ok(converted)
    }

    /// Converts several amounts with at most one remote call
    ///
    /// Identity queries and cache hits are answered locally; the rest go to
    /// the batch endpoint together. Results are returned in input order and
    /// each fetched result is cached under its own key.
    pub async fn convert_batch(
        &self,
        queries: &[ConversionQuery],
    ) -> Result<Vec<ConvertedAmount>, ConversionError> {
        let mut results: Vec<Option<ConvertedAmount>> = Vec::with_capacity(queries.len());
        let mut pending: Vec<usize> = Vec::new();

        for (index, query) in queries.iter().enumerate() {
            if query.is_identity() {
                results.push(Some(identity_conversion(query)));
            } else if let Some(hit) = self.conversions.get(&query.cache_key()) {
                trace!(from = %query.from, to = %query.to, "batch conversion cache hit");
                results.push(Some(hit));
            } else {
                results.push(None);
                pending.push(index);
            }
        }

        if !pending.is_empty() {
            let codes: Vec<&CurrencyCode> = pending
                .iter()
                .flat_map(|&i| [&queries[i].from, &queries[i].to])
                .collect();
            self.ensure_supported(&codes).await?;
            self.conversions.purge_expired();

            let body = BatchRequest {
                conversions: pending
                    .iter()
                    .map(|&i| BatchItem {
                        amount: queries[i].amount,
                        from: queries[i].from.as_str(),
                        to: queries[i].to.as_str(),
                    })
                    .collect(),
            };
            let request = ApiRequest::post(BATCH_CONVERT_PATH, &body);
            let response: BatchResponse = self.execute(&request).await?;

            if response.results.len() != pending.len() {
                return Err(ClassifiedError::MalformedResponse {
                    message: format!(
                        "batch returned {} results for {} conversions",
                        response.results.len(),
                        pending.len()
                    ),
                    excerpt: String::new(),
                }
                .into());
            }

            for (&index, raw) in pending.iter().zip(response.results) {
                let converted = build_conversion(&queries[index], raw)?;
                self.conversions
                    .insert(queries[index].cache_key(), converted.clone());
                results[index] = Some(converted);
            }
            debug!(fetched = pending.len(), total = queries.len(), "batch conversion completed");
        }

        Ok(results.into_iter().flatten().collect())
    }

    /// Converts for display, degrading to the unconverted amount on failure
    ///
    /// Only argument validation errors are returned as `Err`. Remote failures
    /// produce the original amount formatted under the target currency, with
    /// the failure attached as a soft error.
    pub async fn convert_for_display(
        &self,
        amount: f64,
        from: &str,
        to: &str,
    ) -> Result<DisplayConversion, ConversionError> {
        let query = ConversionQuery::parse(amount, from, to)?;

        match self.convert_query(&query).await {
            Ok(conversion) => Ok(DisplayConversion {
                text: format_money(&conversion.converted),
                conversion: Some(conversion),
                error: None,
            }),
            Err(ConversionError::Remote(error)) => {
                warn!(
                    from = %query.from,
                    to = %query.to,
                    error = %error,
                    "conversion failed, displaying unconverted amount"
                );
                Ok(DisplayConversion {
                    text: format_amount(query.amount, query.to.as_str()),
                    conversion: None,
                    error: Some(error),
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Pure local formatting; never performs I/O
    pub fn format_amount(&self, amount: f64, currency: &str) -> String {
        format_amount(amount, currency)
    }

    /// Supported currencies; never fails
    ///
    /// May return a stale list or the built-in fallback list when the API is
    /// unreachable.
    pub async fn get_supported_currencies(&self) -> Vec<SupportedCurrency> {
        self.supported_currencies_with_status().await.currencies
    }

    /// Supported currencies together with where the list came from
    pub async fn supported_currencies_with_status(&self) -> SupportedCurrencies {
        if let Some(currencies) = self.currencies.get(&()) {
            trace!("supported currencies cache hit");
            return SupportedCurrencies {
                currencies,
                source: CurrencyListSource::Cached,
                error: None,
            };
        }

        let request = ApiRequest::get(SUPPORTED_PATH);
        match self.execute::<SupportedResponse>(&request).await {
            Ok(response) if !response.currencies.is_empty() => {
                let currencies = dedup_currencies(response.currencies);
                self.currencies.insert((), currencies.clone());
                SupportedCurrencies {
                    currencies,
                    source: CurrencyListSource::Remote,
                    error: None,
                }
            }
            Ok(_) => self.degraded_currencies(ClassifiedError::MalformedResponse {
                message: "supported currency list is empty".to_string(),
                excerpt: String::new(),
            }),
            Err(error) => self.degraded_currencies(error),
        }
    }

    /// Whether `code` is in the (possibly fallback) supported set
    pub async fn is_supported(&self, code: &CurrencyCode) -> bool {
        self.supported_currencies_with_status().await.contains(code)
    }

    /// Fails with the first of `codes` missing from the supported set
    ///
    /// One list lookup covers every code, so a failing fetch is paid once.
    async fn ensure_supported(&self, codes: &[&CurrencyCode]) -> Result<(), ConversionError> {
        let supported = self.supported_currencies_with_status().await;
        match codes.iter().find(|code| !supported.contains(code)) {
            Some(code) => {
                debug!(currency = %code, source = ?supported.source, "currency not supported");
                Err(ConversionError::InvalidCurrency(code.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Drops every cached conversion (rates and the currency list are kept)
    pub fn invalidate_conversions(&self) {
        self.conversions.clear();
    }

    /// Drops cached conversions whose source or target is `currency`
    pub fn invalidate_conversions_for(&self, currency: &CurrencyCode) -> usize {
        self.conversions
            .invalidate_where(|key| &key.from == currency || &key.to == currency)
    }

    /// Drops one cached rate; returns whether it was cached
    pub fn invalidate_rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> bool {
        self.rates.invalidate(&(from.clone(), to.clone()))
    }

    /// Forces the next supported-currency lookup to hit the API
    pub fn invalidate_supported_currencies(&self) {
        self.currencies.clear();
    }

    /// Drops every cached value
    pub fn clear(&self) {
        self.rates.clear();
        self.conversions.clear();
        self.currencies.clear();
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, ClassifiedError> {
        self.executor
            .execute_with_cancel(request, &self.policy, &self.shutdown)
            .await
    }

    async fn fetch_rate(
        &self,
        from: &CurrencyCode,
        to: &CurrencyCode,
    ) -> Result<ExchangeRate, ConversionError> {
        self.ensure_supported(&[from, to]).await?;
        let purged = self.rates.purge_expired();
        debug!(from = %from, to = %to, purged, "fetching exchange rate");
        let request = ApiRequest::get(RATE_PATH)
            .query("from", from)
            .query("to", to);
        let response: RateResponse = self.execute(&request).await?;
        let rate = checked_rate(response.rate)?;

        Ok(ExchangeRate {
            from: from.clone(),
            to: to.clone(),
            rate,
            as_of: response.as_of.unwrap_or_else(Utc::now),
            source: response
                .source
                .unwrap_or_else(|| DEFAULT_RATE_SOURCE.to_string()),
        })
    }

    async fn fetch_conversion(
        &self,
        query: &ConversionQuery,
    ) -> Result<ConvertedAmount, ConversionError> {
        self.ensure_supported(&[&query.from, &query.to]).await?;
        let purged = self.conversions.purge_expired();
        debug!(
            amount = query.amount,
            from = %query.from,
            to = %query.to,
            purged,
            "fetching conversion"
        );
        let request = ApiRequest::get(CONVERT_PATH)
            .query("amount", query.amount)
            .query("from", &query.from)
            .query("to", &query.to);
        let response: ConvertResponse = self.execute(&request).await?;
        build_conversion(query, response)
    }

    fn degraded_currencies(&self, error: ClassifiedError) -> SupportedCurrencies {
        if let Some(stale) = self.currencies.peek(&()) {
            warn!(error = %error, "supported currency fetch failed, using stale list");
            return SupportedCurrencies {
                currencies: stale.value,
                source: CurrencyListSource::Stale,
                error: Some(error),
            };
        }

        warn!(error = %error, "supported currency fetch failed, using built-in list");
        SupportedCurrencies {
            currencies: fallback_currencies(),
            source: CurrencyListSource::Fallback,
            error: Some(error),
        }
    }
}

fn identity_conversion(query: &ConversionQuery) -> ConvertedAmount {
    let money = Money {
        amount: query.amount,
        currency: query.from.clone(),
    };
    ConvertedAmount {
        original: money.clone(),
        converted: money,
        rate: 1.0,
        as_of: Utc::now(),
    }
}

fn build_conversion(
    query: &ConversionQuery,
    response: ConvertResponse,
) -> Result<ConvertedAmount, ConversionError> {
    let rate = checked_rate(response.rate)?;
    let converted = validate_amount(response.converted_amount).map_err(|_| {
        ClassifiedError::MalformedResponse {
            message: format!("invalid converted amount {}", response.converted_amount),
            excerpt: String::new(),
        }
    })?;

    Ok(ConvertedAmount {
        original: Money {
            amount: query.amount,
            currency: query.from.clone(),
        },
        converted: Money {
            amount: converted,
            currency: query.to.clone(),
        },
        rate,
        as_of: response.as_of.unwrap_or_else(Utc::now),
    })
}

fn checked_rate(rate: f64) -> Result<f64, ClassifiedError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(ClassifiedError::MalformedResponse {
            message: format!("invalid exchange rate {}", rate),
            excerpt: String::new(),
        })
    }
}

/// Keeps the first occurrence of each code, preserving order
fn dedup_currencies(currencies: Vec<SupportedCurrency>) -> Vec<SupportedCurrency> {
    let mut seen = HashSet::new();
    currencies
        .into_iter()
        .filter(|c| seen.insert(c.code.clone()))
        .collect()
}
