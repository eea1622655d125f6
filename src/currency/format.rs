//! Locale-aware amount formatting
//!
//! Formatting is pure and local. Rendering code calls it mid-render, so invalid
//! input yields a sentinel string instead of an error.

use super::{CurrencyCode, Money};

/// Returned for negative, NaN or infinite amounts
pub const INVALID_AMOUNT: &str = "Invalid amount";

/// Returned when the currency argument is not a currency code
pub const INVALID_CURRENCY: &str = "Invalid currency";

/// How a currency is conventionally written in its home locale
#[derive(Debug, Clone, Copy, PartialEq)]
struct CurrencyStyle {
    symbol: &'static str,
    decimals: usize,
    group_separator: &'static str,
    decimal_separator: &'static str,
    symbol_first: bool,
    spaced: bool,
}

impl CurrencyStyle {
    const fn prefix(symbol: &'static str, decimals: usize, spaced: bool) -> Self {
        Self {
            symbol,
            decimals,
            group_separator: ",",
            decimal_separator: ".",
            symbol_first: true,
            spaced,
        }
    }

    const fn continental(symbol: &'static str) -> Self {
        Self {
            symbol,
            decimals: 2,
            group_separator: ".",
            decimal_separator: ",",
            symbol_first: false,
            spaced: true,
        }
    }
}

fn style_for(code: &str) -> Option<CurrencyStyle> {
    let style = match code {
        "USD" => CurrencyStyle::prefix("$", 2, false),
        "GBP" => CurrencyStyle::prefix("£", 2, false),
        "JPY" => CurrencyStyle::prefix("¥", 0, false),
        "CAD" => CurrencyStyle::prefix("CA$", 2, false),
        "AUD" => CurrencyStyle::prefix("A$", 2, false),
        "KES" => CurrencyStyle::prefix("KSh", 2, true),
        "UGX" => CurrencyStyle::prefix("USh", 0, true),
        "TZS" => CurrencyStyle::prefix("TSh", 2, true),
        "NGN" => CurrencyStyle::prefix("₦", 2, false),
        "INR" => CurrencyStyle::prefix("₹", 2, false),
        "CHF" => CurrencyStyle::prefix("CHF", 2, true),
        "EUR" => CurrencyStyle::continental("€"),
        "ZAR" => CurrencyStyle {
            symbol: "R",
            decimals: 2,
            group_separator: " ",
            decimal_separator: ",",
            symbol_first: true,
            spaced: false,
        },
        _ => return None,
    };
    Some(style)
}

/// Formats `amount` in `currency` using that currency's locale conventions
///
/// # Arguments
/// * `amount` - Non-negative, finite amount
/// * `currency` - Currency code, case-insensitive
///
/// # Returns
/// The formatted string, e.g. `"$1,234.56"`, `"1.234,56 €"` or
/// `"KSh 1,500.00"`. Currencies without a known style are written as
/// `"XYZ 1,234.56"`. Invalid input yields [`INVALID_AMOUNT`] or
/// [`INVALID_CURRENCY`].
pub fn format_amount(amount: f64, currency: &str) -> String {
    if !amount.is_finite() || amount < 0.0 {
        return INVALID_AMOUNT.to_string();
    }
    let code = match CurrencyCode::parse(currency) {
        Ok(code) => code,
        Err(_) => return INVALID_CURRENCY.to_string(),
    };

    match style_for(code.as_str()) {
        Some(style) => render(amount, &style),
        None => {
            let number = render_number(amount, 2, ",", ".");
            format!("{} {}", code, number)
        }
    }
}

/// Formats a [`Money`] value
pub fn format_money(money: &Money) -> String {
    format_amount(money.amount, money.currency.as_str())
}

fn render(amount: f64, style: &CurrencyStyle) -> String {
    let number = render_number(
        amount,
        style.decimals,
        style.group_separator,
        style.decimal_separator,
    );
    let gap = if style.spaced { " " } else { "" };
    if style.symbol_first {
        format!("{}{}{}", style.symbol, gap, number)
    } else {
        format!("{}{}{}", number, gap, style.symbol)
    }
}

/// Rounds to `decimals` places and inserts separators
fn render_number(amount: f64, decimals: usize, group: &str, decimal: &str) -> String {
    // `+ 0.0` folds -0.0 so it never renders with a sign
    let fixed = format!("{:.*}", decimals, amount + 0.0);
    let (integer, fraction) = match fixed.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (fixed.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (i, digit) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push_str(group);
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{}{}{}", grouped, decimal, fraction),
        None => grouped,
    }
}
