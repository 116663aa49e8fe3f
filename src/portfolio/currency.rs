use std::collections::BTreeMap;
use tracing::debug;

use crate::config::CurrencyConfig;
use crate::errors::{Result, WorkflowError};

/// Converts amounts between currencies quoted against one base currency.
///
/// A rate is the number of units of a currency per one unit of the base.
/// The base itself always has rate 1.
#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    base: String,
    rates: BTreeMap<String, f64>,
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl CurrencyConverter {
    pub fn new(base: &str) -> Self {
        Self {
            base: normalize(base),
            rates: BTreeMap::new(),
        }
    }

    /// Build from configuration. Keys may come back lowercased from
    /// environment sources, so codes are normalized.
    pub fn from_config(config: &CurrencyConfig) -> Result<Self> {
        let mut converter = Self::new(&config.base);
        for (code, rate) in &config.rates {
            converter.update_rate(code, *rate)?;
        }
        Ok(converter)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Set the manual rate for a currency
    pub fn update_rate(&mut self, code: &str, rate: f64) -> Result<()> {
        let code = normalize(code);
        if !rate.is_finite() || rate <= 0.0 {
            return Err(WorkflowError::Currency(format!(
                "rate for {code} must be positive, got {rate}"
            )));
        }
        if code == self.base {
            if (rate - 1.0).abs() > f64::EPSILON {
                return Err(WorkflowError::Currency(format!(
                    "base currency {code} always has rate 1"
                )));
            }
            return Ok(());
        }
        debug!(currency = %code, rate, "Rate updated");
        self.rates.insert(code, rate);
        Ok(())
    }

    pub fn rate(&self, code: &str) -> Result<f64> {
        let code = normalize(code);
        if code == self.base {
            return Ok(1.0);
        }
        self.rates
            .get(&code)
            .copied()
            .ok_or_else(|| WorkflowError::Currency(format!("unknown currency {code}")))
    }

    /// `amount / rate(from) * rate(to)`
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64> {
        let from_rate = self.rate(from)?;
        let to_rate = self.rate(to)?;
        Ok(amount / from_rate * to_rate)
    }

    /// Every known currency, base first
    pub fn currencies(&self) -> Vec<&str> {
        std::iter::once(self.base.as_str())
            .chain(self.rates.keys().map(String::as_str))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> CurrencyConverter {
        CurrencyConverter::from_config(&CurrencyConfig::default()).unwrap()
    }

    #[test]
    fn test_convert_through_base() {
        let c = converter();
        assert!((c.convert(100.0, "EUR", "XOF").unwrap() - 65_595.7).abs() < 1e-6);
        assert!((c.convert(65_595.7, "XOF", "EUR").unwrap() - 100.0).abs() < 1e-6);

        let usd_to_gbp = c.convert(108.0, "USD", "GBP").unwrap();
        assert!((usd_to_gbp - 85.0).abs() < 1e-9);
        assert_eq!(c.convert(42.0, "usd", " USD ").unwrap(), 42.0);
    }

    #[test]
    fn test_unknown_currency_and_bad_rates() {
        let mut c = converter();
        assert_eq!(c.convert(1.0, "EUR", "JPY").unwrap_err().code(), "CURRENCY");
        assert!(c.update_rate("JPY", 0.0).is_err());
        assert!(c.update_rate("JPY", -3.0).is_err());
        assert!(c.update_rate("JPY", f64::NAN).is_err());
        assert!(c.update_rate("EUR", 2.0).is_err());

        c.update_rate("jpy", 160.0).unwrap();
        assert_eq!(c.rate("JPY").unwrap(), 160.0);
    }

    #[test]
    fn test_lowercase_config_keys() {
        let mut config = CurrencyConfig::default();
        config.base = "eur".into();
        config.rates.insert("chf".into(), 0.95);
        let c = CurrencyConverter::from_config(&config).unwrap();
        assert_eq!(c.base(), "EUR");
        assert_eq!(c.rate("CHF").unwrap(), 0.95);
        assert_eq!(c.currencies()[0], "EUR");
    }
}
