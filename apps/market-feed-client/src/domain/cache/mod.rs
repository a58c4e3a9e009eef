//! Latest-Value Cache
//!
//! Last-write-wins store of the most recent payload per symbol. Staleness
//! is derived on read from the injected clock; nothing is ever expired in
//! the background.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::clock::{SharedClock, elapsed_between};
use super::streaming::Symbol;
use super::subscription::normalize_symbol;

/// The most recent value received for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedValue {
    /// Symbol this value belongs to.
    pub symbol: Symbol,
    /// Payload exactly as routed from the feed.
    pub payload: serde_json::Value,
    /// When the client received it.
    pub received_at: DateTime<Utc>,
}

impl CachedValue {
    /// Age of the value relative to `now`.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.received_at, now)
    }
}

/// Per-symbol latest-value cache.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use market_feed_client::domain::cache::DataCache;
/// use market_feed_client::domain::clock::SystemClock;
///
/// let cache = DataCache::new(Arc::new(SystemClock));
/// assert!(cache.is_stale("AAPL", Duration::from_secs(5)));
///
/// cache.put("AAPL", serde_json::json!({"price": 150.25}));
/// assert!(!cache.is_stale("AAPL", Duration::from_secs(5)));
/// ```
#[derive(Debug)]
pub struct DataCache {
    clock: SharedClock,
    values: RwLock<HashMap<Symbol, CachedValue>>,
}

impl DataCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Store a value, replacing whatever was there. The symbol is stored in
    /// its normalized form.
    pub fn put(&self, symbol: impl Into<Symbol>, payload: serde_json::Value) -> CachedValue {
        let raw = symbol.into();
        let symbol = normalize_symbol(&raw).unwrap_or(raw);
        let value = CachedValue {
            symbol: symbol.clone(),
            payload,
            received_at: self.clock.now(),
        };
        self.values.write().insert(symbol, value.clone());
        value
    }

    /// Latest value for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<CachedValue> {
        let symbol = normalize_symbol(symbol)?;
        self.values.read().get(&symbol).cloned()
    }

    /// Copy of every cached value.
    #[must_use]
    pub fn get_all(&self) -> HashMap<Symbol, CachedValue> {
        self.values.read().clone()
    }

    /// `true` when the symbol is unknown or its value is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, symbol: &str, max_age: Duration) -> bool {
        let Some(symbol) = normalize_symbol(symbol) else {
            return true;
        };
        let now = self.clock.now();
        self.values
            .read()
            .get(&symbol)
            .is_none_or(|value| value.age_at(now) > max_age)
    }

    /// Drop every cached value.
    pub fn clear(&self) {
        self.values.write().clear();
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Cached symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.values.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use crate::domain::clock::Clock;

    use serde_json::json;

    use super::*;
    use crate::domain::clock::ManualClock;

    fn cache_with_clock() -> (DataCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (DataCache::new(clock.clone()), clock)
    }

    #[test]
    fn unknown_symbol_is_stale() {
        let (cache, _clock) = cache_with_clock();
        assert!(cache.is_stale("AAPL", Duration::from_secs(3600)));
        assert!(cache.get("AAPL").is_none());
    }

    #[test]
    fn fresh_value_is_not_stale() {
        let (cache, clock) = cache_with_clock();
        cache.put("AAPL", json!({"price": 150.25}));
        clock.advance(Duration::from_secs(5));
        assert!(!cache.is_stale("AAPL", Duration::from_secs(5)));
    }

    #[test]
    fn old_value_is_stale() {
        let (cache, clock) = cache_with_clock();
        cache.put("AAPL", json!({"price": 150.25}));
        clock.advance(Duration::from_millis(5001));
        assert!(cache.is_stale("AAPL", Duration::from_secs(5)));
    }

    #[test]
    fn last_write_wins() {
        let (cache, clock) = cache_with_clock();
        cache.put("AAPL", json!({"price": 1}));
        clock.advance(Duration::from_secs(1));
        cache.put("AAPL", json!({"price": 2}));

        let value = cache.get("AAPL").unwrap();
        assert_eq!(value.payload["price"], 2);
        assert_eq!(value.received_at, clock.now());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn lookups_ignore_symbol_case() {
        let (cache, _clock) = cache_with_clock();
        cache.put(" aapl ", json!({"price": 150.25}));

        assert_eq!(cache.symbols(), vec!["AAPL".to_string()]);
        assert_eq!(cache.get("aapl").unwrap().symbol, "AAPL");
        assert!(!cache.is_stale("Aapl", Duration::from_secs(5)));
        assert!(cache.is_stale("  ", Duration::MAX));
    }

    #[test]
    fn get_all_and_clear() {
        let (cache, _clock) = cache_with_clock();
        cache.put("MSFT", json!({"price": 400}));
        cache.put("AAPL", json!({"price": 150}));

        assert_eq!(cache.get_all().len(), 2);
        assert_eq!(cache.symbols(), vec!["AAPL".to_string(), "MSFT".to_string()]);

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.is_stale("AAPL", Duration::MAX));
    }
}
