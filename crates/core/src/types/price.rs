//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are displayed the way the storefront shows them to shoppers:
//! currency symbol, thousands separators and no fractional digits
//! (e.g. `$1,250` for 1249.50 MXN).

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., pesos, not centavos).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Format for display, rounded to whole units (e.g., "$1,250").
    #[must_use]
    pub fn display(&self) -> String {
        let rounded = self
            .amount
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let digits = rounded.abs().trunc().to_string();
        let grouped = group_thousands(&digits);
        let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
            "-"
        } else {
            ""
        };
        format!("{sign}{}{grouped}", self.currency_code.symbol())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

/// Insert `,` every three digits from the right.
fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// ISO 4217 currency codes accepted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    MXN,
    USD,
    EUR,
}

impl CurrencyCode {
    /// Display prefix used in the `es-MX` locale.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::MXN => "$",
            Self::USD => "USD ",
            Self::EUR => "EUR ",
        }
    }

    /// ISO code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::MXN => "MXN",
            Self::USD => "USD",
            Self::EUR => "EUR",
        }
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MXN" => Ok(Self::MXN),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mxn(s: &str) -> Price {
        Price::new(s.parse().unwrap(), CurrencyCode::MXN)
    }

    #[test]
    fn test_display_whole_amount() {
        assert_eq!(mxn("450").display(), "$450");
    }

    #[test]
    fn test_display_groups_thousands() {
        assert_eq!(mxn("1250").display(), "$1,250");
        assert_eq!(mxn("1234567").display(), "$1,234,567");
    }

    #[test]
    fn test_display_rounds_half_away_from_zero() {
        assert_eq!(mxn("1249.50").display(), "$1,250");
        assert_eq!(mxn("99.49").display(), "$99");
    }

    #[test]
    fn test_display_zero() {
        assert_eq!(mxn("0").display(), "$0");
        assert_eq!(mxn("0.2").display(), "$0");
    }

    #[test]
    fn test_other_currency_prefix() {
        let price = Price::new("20".parse().unwrap(), CurrencyCode::USD);
        assert_eq!(price.to_string(), "USD 20");
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!("mxn".parse::<CurrencyCode>().unwrap(), CurrencyCode::MXN);
        assert!("ARS".parse::<CurrencyCode>().is_err());
    }
}
