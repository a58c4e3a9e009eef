//! Event Bus
//!
//! Typed publish/subscribe hub. Every component reports through it:
//! state transitions, data, subscription outcomes, errors, drops and
//! latency samples.
//!
//! Two ways to listen:
//!
//! - `on(topic, handler)` registers a synchronous callback. Callbacks run
//!   on the emitting task in transport order; a panicking callback is
//!   caught and logged and the remaining callbacks still run.
//! - `stream()` yields every event asynchronously from a bounded broadcast
//!   channel. A slow stream loses events; the producer never waits.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::domain::connection::ConnectionState;
use crate::domain::error::ClientError;
use crate::domain::metrics::QualityLevel;
use crate::domain::streaming::{MarketDataUpdate, Symbol};
use crate::domain::subscription::normalize_symbol;

/// Default capacity of the async event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

// =============================================================================
// Events
// =============================================================================

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Inbound frame could not be decoded.
    Parse,
    /// Inbound frame decoded but failed validation.
    Validation,
    /// Inbound frame had an unrecognised discriminator.
    UnknownType,
    /// Outbound message did not fit in the outbox.
    OutboxFull,
    /// Outbound message could not be encoded.
    Encode,
}

impl DropReason {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::UnknownType => "unknown_type",
            Self::OutboxFull => "outbox_full",
            Self::Encode => "encode",
        }
    }
}

/// Everything the client reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection state moved.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// Transport opened.
    Connected {
        /// Identifier of this session (one per successful open).
        session_id: Uuid,
    },
    /// Transport closed.
    Disconnected {
        /// Close code, when one was received or sent.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// A reconnect attempt was scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts exhausted; the client is `Failed`.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// Validated market data.
    Data(MarketDataUpdate),
    /// Server confirmed subscriptions.
    SubscriptionConfirmed {
        /// Symbols now active.
        symbols: Vec<Symbol>,
    },
    /// Server denied subscriptions.
    SubscriptionDenied {
        /// Symbols now inactive.
        symbols: Vec<Symbol>,
        /// Server explanation.
        message: Option<String>,
    },
    /// Server confirmed unsubscribes.
    Unsubscribed {
        /// Symbols removed.
        symbols: Vec<Symbol>,
    },
    /// An error was observed.
    Error(ClientError),
    /// A message was dropped.
    MessageDropped {
        /// Drop category.
        reason: DropReason,
        /// Human-readable detail.
        detail: String,
    },
    /// Round-trip latency measured from a pong.
    Latency {
        /// Round trip in milliseconds.
        latency_ms: f64,
        /// Quality bucket.
        quality: QualityLevel,
    },
}

/// Listener topics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event.
    All,
    /// State transitions.
    State,
    /// Connected, disconnected, reconnecting, reconnect failed.
    Connection,
    /// All market data.
    Data,
    /// Market data for one symbol.
    Symbol(Symbol),
    /// Subscription confirmations, denials and unsubscribes.
    Subscription,
    /// Errors.
    Error,
    /// Dropped messages.
    Diagnostic,
    /// Latency samples.
    Latency,
}

impl Topic {
    /// Symbol topics are keyed by the normalized symbol.
    fn normalized(self) -> Self {
        match self {
            Self::Symbol(raw) => Self::Symbol(normalize_symbol(&raw).unwrap_or(raw)),
            other => other,
        }
    }
}

impl ClientEvent {
    /// Topics this event is delivered on.
    #[must_use]
    pub fn topics(&self) -> Vec<Topic> {
        let specific = match self {
            Self::StateChanged { .. } => Topic::State,
            Self::Connected { .. }
            | Self::Disconnected { .. }
            | Self::Reconnecting { .. }
            | Self::ReconnectFailed { .. } => Topic::Connection,
            Self::Data(update) => {
                return vec![Topic::All, Topic::Data, Topic::Symbol(update.symbol.clone())];
            }
            Self::SubscriptionConfirmed { .. }
            | Self::SubscriptionDenied { .. }
            | Self::Unsubscribed { .. } => Topic::Subscription,
            Self::Error(_) => Topic::Error,
            Self::MessageDropped { .. } => Topic::Diagnostic,
            Self::Latency { .. } => Topic::Latency,
        };
        vec![Topic::All, specific]
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Handle returned by [`EventBus::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Typed publish/subscribe hub.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use market_feed_client::application::events::{ClientEvent, EventBus, Topic};
/// use market_feed_client::domain::streaming::MarketDataUpdate;
///
/// let bus = EventBus::default();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// bus.on(Topic::Symbol("AAPL".into()), move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
///
/// bus.emit(ClientEvent::Data(MarketDataUpdate::new("AAPL", serde_json::json!({"price": 1}))));
/// bus.emit(ClientEvent::Data(MarketDataUpdate::new("MSFT", serde_json::json!({"price": 2}))));
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
pub struct EventBus {
    listeners: RwLock<HashMap<Topic, Vec<(ListenerId, Handler)>>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<ClientEvent>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners: usize = self.listeners.read().values().map(Vec::len).sum();
        f.debug_struct("EventBus")
            .field("listeners", &listeners)
            .field("stream_receivers", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus whose async stream buffers `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Register a callback for a topic.
    pub fn on<F>(&self, topic: Topic, handler: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .entry(topic.normalized())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn off(&self, topic: &Topic, id: ListenerId) -> bool {
        let topic = topic.clone().normalized();
        let mut listeners = self.listeners.write();
        let Some(handlers) = listeners.get_mut(&topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            listeners.remove(&topic);
        }
        removed
    }

    /// Deliver an event to every matching callback, then to the stream.
    pub fn emit(&self, event: ClientEvent) {
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.read();
            event
                .topics()
                .iter()
                .filter_map(|topic| listeners.get(topic))
                .flat_map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)))
                .collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(event = ?event.topics().get(1), "Event listener panicked");
            }
        }

        // No stream receivers is fine.
        let _ = self.tx.send(event);
    }

    /// Async stream of every event emitted after this call.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Raw broadcast receiver of every event emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Number of callbacks registered for a topic.
    #[must_use]
    pub fn listener_count(&self, topic: &Topic) -> usize {
        let topic = topic.clone().normalized();
        self.listeners.read().get(&topic).map_or(0, Vec::len)
    }
}

// =============================================================================
// Tests
// =============================================================================
