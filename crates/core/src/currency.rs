use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::expense::{Expense, PendingExpense};

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate lookup request failed: {0}")]
    Transport(String),
    #[error("rate payload could not be decoded: {0}")]
    Decode(String),
}

/// Units of each currency per one unit of `base`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub base: String,
    pub rates: HashMap<String, Decimal>,
}

#[derive(Debug, Deserialize)]
struct RatesPayload {
    rates: HashMap<String, serde_json::Value>,
}

impl ExchangeRates {
    /// Parses a `{"rates": {"EUR": 0.92, ...}}` document. Non-numeric entries
    /// are skipped.
    pub fn from_json(base: &str, body: &str) -> Result<Self, RateError> {
        let payload: RatesPayload =
            serde_json::from_str(body).map_err(|error| RateError::Decode(error.to_string()))?;

        let rates = payload
            .rates
            .into_iter()
            .filter_map(|(code, value)| {
                let rate = match value {
                    serde_json::Value::Number(number) => Decimal::from_str(&number.to_string())
                        .or_else(|_| Decimal::from_scientific(&number.to_string()))
                        .ok(),
                    _ => None,
                }?;
                Some((code.to_ascii_uppercase(), rate))
            })
            .collect();

        Ok(Self { base: base.to_ascii_uppercase(), rates })
    }

    /// Converts `amount` in `currency` into the base currency, rounded to
    /// cents. `None` when no conversion is needed or possible.
    pub fn convert(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        if currency.eq_ignore_ascii_case(&self.base) {
            return None;
        }
        let rate = self.rates.get(&currency.to_ascii_uppercase())?;
        if rate.is_zero() {
            return None;
        }
        amount.checked_div(*rate).map(|converted| converted.round_dp(2))
    }
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn latest(&self, base: &str) -> Result<ExchangeRates, RateError>;
}

/// Provider used when conversion is disabled: every lookup comes back empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRates;

#[async_trait]
impl RateProvider for NoRates {
    async fn latest(&self, base: &str) -> Result<ExchangeRates, RateError> {
        Ok(ExchangeRates { base: base.to_ascii_uppercase(), rates: HashMap::new() })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedExpense {
    pub expense: Expense,
    pub employee_name: String,
    pub base_currency: String,
    pub converted_amount: Option<Decimal>,
}

/// Attaches base-currency amounts for display. Missing rates leave the
/// amount unconverted.
pub fn enrich(
    pending: Vec<PendingExpense>,
    base_currency: &str,
    rates: Option<&ExchangeRates>,
) -> Vec<ConvertedExpense> {
    pending
        .into_iter()
        .map(|PendingExpense { expense, employee_name }| {
            let converted_amount =
                rates.and_then(|rates| rates.convert(expense.amount, &expense.currency));
            ConvertedExpense {
                expense,
                employee_name,
                base_currency: base_currency.to_string(),
                converted_amount,
            }
        })
        .collect()
}
