//! Display currency selection
//!
//! On startup the selector moves `Uninitialized -> Detecting -> Ready`,
//! picking the first of: the stored user preference, the currency implied by
//! the locale, and [`DEFAULT_CURRENCY`]. Each candidate must be in the
//! supported set. Read-path failures never block reaching `Ready`; they are
//! recorded as a soft error on the selection instead.

use thiserror::Error;
use tracing::{debug, info, warn};

use super::service::{ConversionService, CurrencyListSource, SupportedCurrencies};
use super::{ConversionError, CurrencyCode};
use crate::preferences::{PreferenceError, PreferenceStore};

/// Preference key holding the chosen currency code
pub const PREFERENCE_KEY: &str = "preferred_currency";

/// Used when neither the preference nor the locale yields a supported currency
pub const DEFAULT_CURRENCY: &str = "USD";

/// Errors from an explicit user selection
#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    InvalidCurrency(#[from] ConversionError),

    #[error("Currency {0} is not supported")]
    Unsupported(CurrencyCode),

    /// The choice could not be persisted; the previous selection is kept
    #[error("Could not save currency preference: {0}")]
    Preference(#[from] PreferenceError),
}

/// Why a currency was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    /// Read from the preference store
    Preference,
    /// Inferred from the locale
    Locale,
    /// Hard-coded default
    Default,
    /// Chosen explicitly by the user this session
    User,
}

/// A resolved display currency
#[derive(Debug, Clone, PartialEq)]
pub struct CurrencySelection {
    pub currency: CurrencyCode,
    pub source: SelectionSource,
    /// Non-fatal problem hit while resolving, for diagnostics
    pub soft_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    Uninitialized,
    Detecting,
    Ready(CurrencySelection),
}

/// Tracks the display currency and persists explicit choices
#[derive(Debug)]
pub struct CurrencySelector<P: PreferenceStore> {
    store: P,
    state: SelectionState,
}

impl<P: PreferenceStore> CurrencySelector<P> {
    pub fn new(store: P) -> Self {
        Self {
            store,
            state: SelectionState::Uninitialized,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// The selected currency, once `Ready`
    pub fn current(&self) -> Option<&CurrencyCode> {
        match &self.state {
            SelectionState::Ready(selection) => Some(&selection.currency),
            _ => None,
        }
    }

    pub fn store(&self) -> &P {
        &self.store
    }

    /// Resolves the startup currency and moves to `Ready`
    ///
    /// # Arguments
    /// * `service` - Source of the supported-currency set
    /// * `locale` - Locale tag such as `"en-KE"` or `"de_DE.UTF-8"`, if known
    ///
    /// # Returns
    /// The resolved selection. This never fails: an unreachable API or an
    /// unreadable preference store is recorded in `soft_error`.
    pub async fn initialize(
        &mut self,
        service: &ConversionService,
        locale: Option<&str>,
    ) -> CurrencySelection {
        self.state = SelectionState::Detecting;

        let supported = service.supported_currencies_with_status().await;
        let selection = self.resolve(&supported, locale);
        info!(
            currency = %selection.currency,
            source = ?selection.source,
            "display currency selected"
        );

        self.state = SelectionState::Ready(selection.clone());
        selection
    }

    /// Applies an explicit user choice
    ///
    /// The choice is validated against the supported set and persisted before
    /// the state changes. Cached conversions are dropped so nothing computed
    /// for the previous currency is reused.
    ///
    /// # Returns
    /// * `Ok(CurrencySelection)` - The new selection
    /// * `Err(SelectionError)` - Invalid or unsupported code, or a failed
    ///   preference write; the previous state is kept in every case
    pub async fn select(
        &mut self,
        service: &ConversionService,
        code: &str,
    ) -> Result<CurrencySelection, SelectionError> {
        let currency = CurrencyCode::parse(code)?;
        if !service.is_supported(&currency).await {
            return Err(SelectionError::Unsupported(currency));
        }

        self.store.set(PREFERENCE_KEY, currency.as_str())?;
        service.invalidate_conversions();

        let selection = CurrencySelection {
            currency,
            source: SelectionSource::User,
            soft_error: None,
        };
        self.state = SelectionState::Ready(selection.clone());
        Ok(selection)
    }

    fn resolve(&self, supported: &SupportedCurrencies, locale: Option<&str>) -> CurrencySelection {
        let mut soft_errors: Vec<String> = Vec::new();
        if let Some(error) = &supported.error {
            soft_errors.push(format!("supported currencies unavailable: {}", error));
        }

        // A built-in list says nothing about what the server accepts, so a
        // stored preference cannot be validated against it
        let trust_preference = supported.source != CurrencyListSource::Fallback;

        if trust_preference {
            match self.stored_preference() {
                Ok(Some(code)) if supported.contains(&code) => {
                    return selection(code, SelectionSource::Preference, soft_errors);
                }
                Ok(Some(code)) => {
                    debug!(currency = %code, "stored currency preference is not supported");
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "could not read currency preference");
                    soft_errors.push(error);
                }
            }
        }

        if let Some(code) = locale.and_then(locale_default_currency) {
            if supported.contains(&code) {
                return selection(code, SelectionSource::Locale, soft_errors);
            }
        }

        let fallback = CurrencyCode(DEFAULT_CURRENCY.to_string());
        selection(fallback, SelectionSource::Default, soft_errors)
    }

    fn stored_preference(&self) -> Result<Option<CurrencyCode>, String> {
        let raw = self
            .store
            .get(PREFERENCE_KEY)
            .map_err(|e| e.to_string())?;
        match raw {
            Some(raw) => CurrencyCode::parse(&raw)
                .map(Some)
                .map_err(|e| format!("stored preference is invalid: {}", e)),
            None => Ok(None),
        }
    }
}

fn selection(
    currency: CurrencyCode,
    source: SelectionSource,
    soft_errors: Vec<String>,
) -> CurrencySelection {
    CurrencySelection {
        currency,
        source,
        soft_error: if soft_errors.is_empty() {
            None
        } else {
            Some(soft_errors.join("; "))
        },
    }
}

/// Infers a currency from a locale tag
///
/// Accepts BCP 47 (`"en-KE"`), POSIX (`"de_DE.UTF-8"`) and bare region
/// (`"KE"`) forms. Only the region matters; a language without a region maps
/// to nothing, except `ja` which is unambiguous.
pub fn locale_default_currency(locale: &str) -> Option<CurrencyCode> {
    let tag = locale.split(['.', '@']).next().unwrap_or_default();
    let parts: Vec<&str> = tag.split(['-', '_']).filter(|p| !p.is_empty()).collect();

    let region = match parts.as_slice() {
        [single] if single.len() == 2 && single.chars().all(|c| c.is_ascii_uppercase()) => {
            Some(*single)
        }
        [language] => {
            return match language.to_ascii_lowercase().as_str() {
                "ja" => Some(CurrencyCode("JPY".to_string())),
                _ => None,
            }
        }
        [_, rest @ ..] => rest
            .iter()
            .copied()
            .find(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_alphabetic())),
        [] => None,
    }?;

    let code = match region.to_ascii_uppercase().as_str() {
        "US" => "USD",
        "GB" => "GBP",
        "KE" => "KES",
        "UG" => "UGX",
        "TZ" => "TZS",
        "NG" => "NGN",
        "ZA" => "ZAR",
        "JP" => "JPY",
        "CA" => "CAD",
        "AU" => "AUD",
        "CH" => "CHF",
        "IN" => "INR",
        "DE" | "FR" | "IT" | "ES" | "NL" | "BE" | "AT" | "IE" | "PT" | "FI" | "GR" | "LU"
        | "SK" | "SI" | "EE" | "LV" | "LT" | "MT" | "CY" | "HR" => "EUR",
        _ => return None,
    };
    Some(CurrencyCode(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{RequestExecutor, RetryPolicy};
    use crate::preferences::MemoryPreferenceStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Store whose reads and writes always fail
    #[derive(Debug, Default)]
    struct BrokenStore;

    impl PreferenceStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, PreferenceError> {
            Err(PreferenceError::NoDirectory)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), PreferenceError> {
            Err(PreferenceError::NoDirectory)
        }

        fn remove(&self, _key: &str) -> Result<(), PreferenceError> {
            Err(PreferenceError::NoDirectory)
        }
    }

    fn create_service(server: &MockServer) -> ConversionService {
        let executor = RequestExecutor::new(server.uri());
        ConversionService::new(executor, RetryPolicy::no_retries())
    }

    async fn mount_currencies(server: &MockServer, codes: &[&str]) {
        let currencies: Vec<_> = codes
            .iter()
            .map(|code| json!({ "code": code, "name": code, "symbol": code }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/currency/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "currencies": currencies })))
            .mount(server)
            .await;
    }

    fn store_with(code: &str) -> MemoryPreferenceStore {
        let store = MemoryPreferenceStore::new();
        store.set(PREFERENCE_KEY, code).unwrap();
        store
    }

    #[test]
    fn test_locale_default_currency() {
        let cases = [
            ("en-US", Some("USD")),
            ("en_GB.UTF-8", Some("GBP")),
            ("sw-KE", Some("KES")),
            ("de_DE@euro", Some("EUR")),
            ("zh-Hant-TW", None),
            ("KE", Some("KES")),
            ("ja", Some("JPY")),
            ("en", None),
            ("", None),
        ];
        for (locale, expected) in cases {
            assert_eq!(
                locale_default_currency(locale).as_ref().map(CurrencyCode::as_str),
                expected,
                "locale {:?}",
                locale
            );
        }
    }

    #[test]
    fn test_new_selector_is_uninitialized() {
        let selector = CurrencySelector::new(MemoryPreferenceStore::new());
        assert_eq!(selector.state(), &SelectionState::Uninitialized);
        assert!(selector.current().is_none());
    }

    #[tokio::test]
    async fn test_initialize_prefers_stored_preference() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD", "EUR", "KES"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(store_with("kes"));
        let selection = selector.initialize(&service, Some("en-GB")).await;

        assert_eq!(selection.currency.as_str(), "KES");
        assert_eq!(selection.source, SelectionSource::Preference);
        assert!(selection.soft_error.is_none());
        assert_eq!(selector.current().map(CurrencyCode::as_str), Some("KES"));
    }

    #[tokio::test]
    async fn test_initialize_skips_unsupported_preference() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD", "EUR"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(store_with("NGN"));
        let selection = selector.initialize(&service, Some("de-DE")).await;

        assert_eq!(selection.currency.as_str(), "EUR");
        assert_eq!(selection.source, SelectionSource::Locale);
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_default() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD", "EUR"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(MemoryPreferenceStore::new());
        let selection = selector.initialize(&service, Some("en-NG")).await;

        assert_eq!(selection.currency.as_str(), DEFAULT_CURRENCY);
        assert_eq!(selection.source, SelectionSource::Default);
    }

    #[tokio::test]
    async fn test_initialize_reaches_ready_when_list_fetch_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(store_with("KES"));
        let selection = selector.initialize(&service, Some("en-GB")).await;

        // preference is not trusted against the built-in list; locale is
        assert_eq!(selection.currency.as_str(), "GBP");
        assert_eq!(selection.source, SelectionSource::Locale);
        assert!(selection.soft_error.is_some());
        assert!(matches!(selector.state(), SelectionState::Ready(_)));
    }

    #[tokio::test]
    async fn test_initialize_records_unreadable_preference() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(BrokenStore);
        let selection = selector.initialize(&service, None).await;

        assert_eq!(selection.currency.as_str(), "USD");
        assert_eq!(selection.source, SelectionSource::Default);
        assert!(selection.soft_error.is_some());
    }

    #[tokio::test]
    async fn test_select_persists_and_invalidates_conversions() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD", "EUR", "GBP"]).await;
        Mock::given(method("GET"))
            .and(path("/currency/convert"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "convertedAmount": 9.0,
                "rate": 0.9
            })))
            .expect(2)
            .mount(&server)
            .await;
        let service = create_service(&server);

        service.convert(10.0, "USD", "EUR").await.unwrap();

        let mut selector = CurrencySelector::new(MemoryPreferenceStore::new());
        let selection = selector.select(&service, "gbp").await.unwrap();

        assert_eq!(selection.currency.as_str(), "GBP");
        assert_eq!(selection.source, SelectionSource::User);
        assert_eq!(
            selector.store().get(PREFERENCE_KEY).unwrap().as_deref(),
            Some("GBP")
        );

        // the cached conversion was dropped, so this hits the server again
        service.convert(10.0, "USD", "EUR").await.unwrap();
    }

    #[tokio::test]
    async fn test_select_rejects_unsupported_currency() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(MemoryPreferenceStore::new());
        let err = selector.select(&service, "JPY").await.unwrap_err();

        assert!(matches!(err, SelectionError::Unsupported(_)));
        assert_eq!(selector.state(), &SelectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_select_rejects_malformed_code_without_io() {
        let server = MockServer::start().await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(MemoryPreferenceStore::new());
        let err = selector.select(&service, "dollars").await.unwrap_err();

        assert!(matches!(err, SelectionError::InvalidCurrency(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_select_surfaces_write_failure_and_keeps_state() {
        let server = MockServer::start().await;
        mount_currencies(&server, &["USD", "EUR"]).await;
        let service = create_service(&server);

        let mut selector = CurrencySelector::new(BrokenStore);
        selector.initialize(&service, None).await;
        let err = selector.select(&service, "EUR").await.unwrap_err();

        assert!(matches!(err, SelectionError::Preference(_)));
        assert_eq!(selector.current().map(CurrencyCode::as_str), Some("USD"));
    }

    #[test]
    fn test_resolve_trusts_preference_against_stale_list() {
        let selector = CurrencySelector::new(store_with("EUR"));
        let list = SupportedCurrencies {
            currencies: crate::currency::fallback_currencies(),
            source: CurrencyListSource::Stale,
            error: None,
        };

        let selection = selector.resolve(&list, Some("en-US"));

        assert_eq!(selection.currency.as_str(), "EUR");
        assert_eq!(selection.source, SelectionSource::Preference);
    }
}
