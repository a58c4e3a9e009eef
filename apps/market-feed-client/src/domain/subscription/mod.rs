//! Subscription Registry
//!
//! Tracks which symbols the application wants and what the server has
//! confirmed. The registry never talks to the transport: it hands back the
//! subscribe requests the connection manager should write.
//!
//! # Design
//!
//! The desired set survives reconnects. The server keeps no subscription
//! state across a dropped socket, so on every successful open the registry
//! produces subscribe requests for every non-`Inactive` entry.
//!
//! Requests for new subscriptions are only produced while the registry is
//! *live* (connection open). Anything subscribed while offline is carried
//! by the replay instead, so each desired symbol goes out exactly once per
//! reconnect.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::clock::SharedClock;
use super::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Server-side lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Requested, awaiting server confirmation.
    Pending,
    /// Confirmed by the server.
    Active,
    /// Unsubscribed or denied; no longer desired.
    Inactive,
}

/// A desired subscription for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Normalized symbol.
    pub symbol: Symbol,
    /// Channels requested for the symbol (quotes, trades, ...).
    pub channels: BTreeSet<String>,
    /// Last time the application asked for this symbol.
    pub desired_since: DateTime<Utc>,
    /// Server-side status.
    pub status: SubscriptionStatus,
}

/// A subscribe request the connection manager should send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Symbols to subscribe.
    pub symbols: Vec<Symbol>,
    /// Channels for all of the symbols.
    pub channels: Vec<String>,
}

/// Result of a `subscribe` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Symbols now pending (new, re-activated, widened, or still unconfirmed).
    pub pending: Vec<Symbol>,
    /// Active symbols whose channels already covered the request.
    pub unchanged: Vec<Symbol>,
    /// Request to write now; `None` when offline or nothing changed.
    pub request: Option<SubscriptionRequest>,
}

/// Count of entries per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Awaiting confirmation.
    pub pending: usize,
    /// Confirmed.
    pub active: usize,
    /// No longer desired, awaiting unsubscribe confirmation.
    pub inactive: usize,
}

/// Normalize a symbol: trimmed and uppercased; blank symbols are rejected.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_uppercase())
    }
}

fn normalize_all<S: AsRef<str>>(symbols: &[S]) -> Vec<Symbol> {
    let mut seen = BTreeSet::new();
    symbols
        .iter()
        .filter_map(|s| normalize_symbol(s.as_ref()))
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<Symbol, Subscription>,
    live: bool,
}

impl RegistryState {
    fn mark_inactive(&mut self, symbols: &[Symbol]) -> Vec<Symbol> {
        let mut removed = Vec::new();
        for symbol in symbols {
            if let Some(entry) = self.entries.get_mut(symbol)
                && entry.status != SubscriptionStatus::Inactive
            {
                entry.status = SubscriptionStatus::Inactive;
                removed.push(symbol.clone());
            }
        }
        removed
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Tracks desired versus confirmed subscriptions.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use market_feed_client::domain::clock::SystemClock;
/// use market_feed_client::domain::subscription::{SubscriptionRegistry, SubscriptionStatus};
///
/// let registry = SubscriptionRegistry::new(Arc::new(SystemClock));
///
/// // Offline: recorded, nothing to send yet
/// let outcome = registry.subscribe(&["AAPL"], &["quotes"]);
/// assert!(outcome.request.is_none());
///
/// // Connection opens: the desired set is replayed
/// let replay = registry.on_reconnected();
/// assert_eq!(replay[0].symbols, vec!["AAPL".to_string()]);
///
/// registry.confirm(&["AAPL"]);
/// assert_eq!(registry.get("AAPL").unwrap().status, SubscriptionStatus::Active);
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    clock: SharedClock,
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Add or update desired subscriptions.
    pub fn subscribe<S: AsRef<str>, C: AsRef<str>>(
        &self,
        symbols: &[S],
        channels: &[C],
    ) -> SubscribeOutcome {
        let symbols = normalize_all(symbols);
        let requested: BTreeSet<String> = channels
            .iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        let now = self.clock.now();

        let mut state = self.state.write();
        let mut outcome = SubscribeOutcome::default();

        for symbol in symbols {
            match state.entries.get_mut(&symbol) {
                Some(entry)
                    if entry.status == SubscriptionStatus::Active
                        && requested.is_subset(&entry.channels) =>
                {
                    entry.desired_since = now;
                    outcome.unchanged.push(symbol);
                }
                Some(entry) if entry.status == SubscriptionStatus::Inactive => {
                    entry.channels.clone_from(&requested);
                    entry.desired_since = now;
                    entry.status = SubscriptionStatus::Pending;
                    outcome.pending.push(symbol);
                }
                Some(entry) => {
                    entry.channels.extend(requested.iter().cloned());
                    entry.desired_since = now;
                    entry.status = SubscriptionStatus::Pending;
                    outcome.pending.push(symbol);
                }
                None => {
                    state.entries.insert(
                        symbol.clone(),
                        Subscription {
                            symbol: symbol.clone(),
                            channels: requested.clone(),
                            desired_since: now,
                            status: SubscriptionStatus::Pending,
                        },
                    );
                    outcome.pending.push(symbol);
                }
            }
        }

        if state.live && !outcome.pending.is_empty() {
            outcome.request = Some(SubscriptionRequest {
                symbols: outcome.pending.clone(),
                channels: requested.into_iter().collect(),
            });
        }

        outcome
    }

    /// Mark symbols `Inactive`, removing them from the desired set.
    ///
    /// Returns the normalized symbols the caller asked to drop; the
    /// unsubscribe frame covers all of them whether or not they were known.
    pub fn unsubscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Symbol> {
        let symbols = normalize_all(symbols);
        self.state.write().mark_inactive(&symbols);
        symbols
    }

    /// Server confirmed these subscriptions. Unknown or inactive symbols are
    /// ignored. Returns the symbols that became active.
    pub fn confirm<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Symbol> {
        let symbols = normalize_all(symbols);
        let mut state = self.state.write();
        let mut confirmed = Vec::new();

        for symbol in symbols {
            if let Some(entry) = state.entries.get_mut(&symbol)
                && entry.status == SubscriptionStatus::Pending
            {
                entry.status = SubscriptionStatus::Active;
                confirmed.push(symbol);
            }
        }

        confirmed
    }

    /// Server refused these subscriptions. Returns the symbols that were
    /// desired and are now inactive.
    pub fn deny<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Symbol> {
        let symbols = normalize_all(symbols);
        self.state.write().mark_inactive(&symbols)
    }

    /// Server confirmed an unsubscribe; inactive entries are forgotten.
    pub fn confirm_unsubscribed<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<Symbol> {
        let symbols = normalize_all(symbols);
        let mut state = self.state.write();
        symbols
            .into_iter()
            .filter(|symbol| {
                let inactive = state
                    .entries
                    .get(symbol)
                    .is_some_and(|e| e.status == SubscriptionStatus::Inactive);
                if inactive {
                    state.entries.remove(symbol);
                }
                inactive
            })
            .collect()
    }

    /// Connection opened: become live and return the requests that restore
    /// every desired subscription. Symbols sharing a channel set share a
    /// request; each symbol appears exactly once.
    pub fn on_reconnected(&self) -> Vec<SubscriptionRequest> {
        let mut state = self.state.write();
        state.live = true;

        let mut by_channels: BTreeMap<Vec<String>, Vec<Symbol>> = BTreeMap::new();
        for entry in state.entries.values_mut() {
            if entry.status == SubscriptionStatus::Inactive {
                continue;
            }
            entry.status = SubscriptionStatus::Pending;
            by_channels
                .entry(entry.channels.iter().cloned().collect())
                .or_default()
                .push(entry.symbol.clone());
        }

        by_channels
            .into_iter()
            .map(|(channels, mut symbols)| {
                symbols.sort();
                SubscriptionRequest { symbols, channels }
            })
            .collect()
    }

    /// Connection lost: stop producing live requests. Confirmed entries go
    /// back to pending because the server forgot them.
    pub fn on_disconnected(&self) {
        let mut state = self.state.write();
        state.live = false;
        for entry in state.entries.values_mut() {
            if entry.status == SubscriptionStatus::Active {
                entry.status = SubscriptionStatus::Pending;
            }
        }
    }

    /// Desired subscriptions (everything not `Inactive`), sorted by symbol.
    #[must_use]
    pub fn list(&self) -> Vec<Subscription> {
        let mut list: Vec<_> = self
            .state
            .read()
            .entries
            .values()
            .filter(|e| e.status != SubscriptionStatus::Inactive)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    /// Look up one entry, including inactive ones.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Subscription> {
        let symbol = normalize_symbol(symbol)?;
        self.state.read().entries.get(&symbol).cloned()
    }

    /// Whether the registry currently produces live requests.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.read().live
    }

    /// Entry counts by status.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let state = self.state.read();
        let mut stats = SubscriptionStats::default();
        for entry in state.entries.values() {
            match entry.status {
                SubscriptionStatus::Pending => stats.pending += 1,
                SubscriptionStatus::Active => stats.active += 1,
                SubscriptionStatus::Inactive => stats.inactive += 1,
            }
        }
        stats
    }
}

// =============================================================================
// Tests
// =============================================================================
