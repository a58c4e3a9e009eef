//! Market Data Streaming Types
//!
//! Codec-agnostic representation of the values pushed by the feed. The
//! payload stays an opaque JSON value because feeds disagree on field sets;
//! helpers pull out the handful of fields the client itself cares about.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A symbol string (stock ticker or OCC option symbol).
pub type Symbol = String;

/// Epoch values below this are taken to be seconds rather than milliseconds.
const SECONDS_CUTOFF: i64 = 1_000_000_000_000;

/// Normalize an epoch timestamp given in seconds or milliseconds to
/// milliseconds.
#[must_use]
pub const fn normalize_epoch_millis(value: i64) -> i64 {
    if value.abs() < SECONDS_CUTOFF {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Read a JSON number (integer or float) as epoch milliseconds.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn epoch_millis_from_json(value: &serde_json::Value) -> Option<i64> {
    let raw = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))?;
    Some(normalize_epoch_millis(raw))
}

/// A validated market data update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketDataUpdate {
    /// Symbol the update belongs to.
    pub symbol: Symbol,
    /// Feed-specific payload (price, size, bid/ask, ...).
    pub data: serde_json::Value,
    /// Source timestamp in epoch milliseconds, when the feed supplied one.
    pub timestamp_ms: Option<i64>,
}

impl MarketDataUpdate {
    /// Create a new update.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, data: serde_json::Value) -> Self {
        Self {
            symbol: symbol.into(),
            data,
            timestamp_ms: None,
        }
    }

    /// Attach a source timestamp (seconds or milliseconds).
    #[must_use]
    pub const fn with_timestamp(mut self, epoch: i64) -> Self {
        self.timestamp_ms = Some(normalize_epoch_millis(epoch));
        self
    }

    /// The `price` field of the payload as a decimal.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        decimal_field(&self.data, "price")
    }

    /// Source timestamp as a UTC datetime.
    #[must_use]
    pub fn source_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms.and_then(DateTime::from_timestamp_millis)
    }
}

/// Read a numeric (or numeric string) field of a JSON object as a decimal.
///
/// Floats go through their shortest string form so `150.25` stays exactly
/// `150.25`.
#[must_use]
pub fn decimal_field(payload: &serde_json::Value, field: &str) -> Option<Decimal> {
    match payload.get(field)? {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}
