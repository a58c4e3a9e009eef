//! Message Router
//!
//! Decodes, validates and dispatches inbound frames. Every frame counts as
//! received; anything that cannot be used counts as dropped and produces a
//! diagnostic event. Nothing here panics on bad input.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::application::events::{ClientEvent, DropReason, EventBus};
use crate::application::ports::{InboundMessage, MessageSchema, SharedClock};
use crate::domain::cache::DataCache;
use crate::domain::error::ClientError;
use crate::domain::metrics::MetricsCollector;
use crate::domain::streaming::{MarketDataUpdate, epoch_millis_from_json};
use crate::domain::subscription::{SubscriptionRegistry, normalize_symbol};

/// What happened to a routed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// Market data cached and emitted.
    Data,
    /// Subscription bookkeeping updated.
    Subscription,
    /// Heartbeat reply; latency when it could be measured.
    Pong(Option<f64>),
    /// Server error surfaced.
    ServerError,
    /// Frame dropped.
    Dropped(DropReason),
}

/// Routes inbound frames to the cache, registry, metrics and event bus.
#[derive(Debug)]
pub struct MessageRouter {
    schema: Arc<dyn MessageSchema>,
    cache: Arc<DataCache>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<MetricsCollector>,
    events: Arc<EventBus>,
    clock: SharedClock,
    last_ping_ms: Mutex<Option<i64>>,
}

impl MessageRouter {
    /// Create a router over shared collaborators.
    #[must_use]
    pub fn new(
        schema: Arc<dyn MessageSchema>,
        cache: Arc<DataCache>,
        registry: Arc<SubscriptionRegistry>,
        metrics: Arc<MetricsCollector>,
        events: Arc<EventBus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            schema,
            cache,
            registry,
            metrics,
            events,
            clock,
            last_ping_ms: Mutex::new(None),
        }
    }

    /// Remember when the last ping went out, for pongs that do not echo it.
    pub fn record_ping(&self, timestamp_ms: i64) {
        *self.last_ping_ms.lock() = Some(timestamp_ms);
    }

    /// Route one raw text frame.
    pub fn route(&self, raw: &str) -> RouteOutcome {
        self.metrics.record_received();

        let message = match self.schema.decode(raw) {
            Ok(message) => message,
            Err(e) => return self.drop_frame(DropReason::Parse, e.to_string()),
        };

        match message {
            InboundMessage::MarketData {
                symbol,
                data,
                timestamp,
            } => match validate_update(symbol.as_deref(), data, timestamp.as_ref()) {
                Ok(update) => {
                    self.cache.put(update.symbol.clone(), update.data.clone());
                    self.events.emit(ClientEvent::Data(update));
                    RouteOutcome::Data
                }
                Err(reason) => self.drop_frame(DropReason::Validation, reason),
            },
            InboundMessage::SubscriptionConfirmed { symbols } => {
                let confirmed = self.registry.confirm(&symbols);
                if confirmed.len() < symbols.len() {
                    tracing::debug!(
                        received = symbols.len(),
                        matched = confirmed.len(),
                        "Ignoring unmatched subscription confirmations"
                    );
                }
                if !confirmed.is_empty() {
                    tracing::info!(symbols = ?confirmed, "Subscriptions confirmed");
                    self.events
                        .emit(ClientEvent::SubscriptionConfirmed { symbols: confirmed });
                }
                RouteOutcome::Subscription
            }
            InboundMessage::SubscriptionDenied { symbols, message } => {
                let denied = self.registry.deny(&symbols);
                tracing::warn!(symbols = ?denied, message = ?message, "Subscriptions denied");
                self.events.emit(ClientEvent::SubscriptionDenied {
                    symbols: denied,
                    message,
                });
                RouteOutcome::Subscription
            }
            InboundMessage::UnsubscribeConfirmed { symbols } => {
                self.registry.confirm_unsubscribed(&symbols);
                let symbols = symbols.iter().filter_map(|s| normalize_symbol(s)).collect();
                self.events.emit(ClientEvent::Unsubscribed { symbols });
                RouteOutcome::Subscription
            }
            InboundMessage::Pong { timestamp } => RouteOutcome::Pong(self.on_pong(timestamp.as_ref())),
            InboundMessage::Error { message } => {
                tracing::warn!(message = %message, "Feed reported an error");
                self.metrics.record_error();
                self.events
                    .emit(ClientEvent::Error(ClientError::Server(message)));
                RouteOutcome::ServerError
            }
            InboundMessage::Unknown { kind } => {
                self.drop_frame(DropReason::UnknownType, format!("unknown message type '{kind}'"))
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn on_pong(&self, timestamp: Option<&Value>) -> Option<f64> {
        let sent_ms = timestamp
            .and_then(epoch_millis_from_json)
            .or_else(|| *self.last_ping_ms.lock())?;
        let latency_ms = (self.clock.now_millis() - sent_ms) as f64;
        if latency_ms < 0.0 {
            tracing::debug!(latency_ms, "Ignoring pong from the future");
            return None;
        }

        let quality = self.metrics.record_latency(latency_ms);
        tracing::trace!(latency_ms, quality = quality.as_str(), "Pong received");
        self.events.emit(ClientEvent::Latency {
            latency_ms,
            quality,
        });
        Some(latency_ms)
    }

    fn drop_frame(&self, reason: DropReason, detail: String) -> RouteOutcome {
        self.metrics.record_dropped();
        tracing::debug!(reason = reason.as_str(), detail = %detail, "Dropping inbound frame");
        self.events
            .emit(ClientEvent::MessageDropped { reason, detail });
        RouteOutcome::Dropped(reason)
    }
}

/// Check a decoded market data frame.
fn validate_update(
    symbol: Option<&str>,
    data: Value,
    timestamp: Option<&Value>,
) -> Result<MarketDataUpdate, String> {
    let symbol = symbol
        .and_then(normalize_symbol)
        .ok_or_else(|| "market data update without symbol".to_string())?;

    if data.is_null() {
        return Err(format!("market data update for {symbol} without data"));
    }

    let mut update = MarketDataUpdate::new(symbol, data);
    match timestamp {
        None | Some(Value::Null) => {}
        Some(value) => {
            let millis = epoch_millis_from_json(value).ok_or_else(|| {
                format!("market data update for {} has non-numeric timestamp", update.symbol)
            })?;
            update.timestamp_ms = Some(millis);
        }
    }

    Ok(update)
}
