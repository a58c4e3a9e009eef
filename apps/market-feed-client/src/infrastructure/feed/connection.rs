//! Connection Manager
//!
//! Owns the single logical connection to the feed: the state machine, the
//! reconnect loop, the outbound queue and the per-session heartbeat. It
//! composes the subscription registry, cache, metrics, router and event
//! bus, and is the only component that touches the transport.
//!
//! # Task Model
//!
//! `connect` spawns one supervisor task holding a [`CancellationToken`].
//! The supervisor loops connect → session → backoff until the caller
//! disconnects, the server closes normally, or the reconnect policy gives
//! up. Each session spawns a heartbeat task on a child token. Inbound
//! frames are routed synchronously inside the session loop, so listeners
//! see data in transport order.
//!
//! # State Machine
//!
//! ```text
//! Idle ──connect──▶ Connecting ──open──▶ Open ──close──▶ Closed
//!                       │                  │               │
//!                       └──fail──▶ Closed ◀┘ (abnormal)    ├──backoff──▶ Connecting
//!                                                          └──exhausted──▶ Failed
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::auth::{build_connection_url, redact_url, resolve_identity};
use super::codec::JsonEnvelopeSchema;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
use super::outbox::{DEFAULT_OUTBOX_CAPACITY, Outbox, OutboxMessage, OutboxReceiver};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::transport::WebSocketTransport;
use crate::application::events::{ClientEvent, DEFAULT_EVENT_CAPACITY, DropReason, EventBus};
use crate::application::ports::{
    CLOSE_NORMAL, CLOSE_STALE, CredentialProvider, EnvCredentials, HealthProbe, MessageSchema,
    OutboundMessage, SharedClock, SystemClock, Transport, TransportConnection, TransportError,
    TransportFrame,
};
use crate::application::services::MessageRouter;
use crate::domain::cache::DataCache;
use crate::domain::connection::ConnectionState;
use crate::domain::error::ClientError;
use crate::domain::metrics::{MetricsCollector, MetricsSnapshot};
use crate::domain::subscription::{SubscribeOutcome, Subscription, SubscriptionRegistry};

/// Default time allowed for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reason used by [`ConnectionManager::cleanup`].
pub const TEARDOWN_REASON: &str = "client teardown";

// =============================================================================
// Configuration
// =============================================================================

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Feed WebSocket URL (identity and token are appended per attempt).
    pub url: Url,
    /// Time allowed for the transport to open.
    pub connect_timeout: Duration,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
    /// Heartbeat timers.
    pub heartbeat: HeartbeatConfig,
    /// Outbound queue capacity.
    pub outbox_capacity: usize,
    /// Async event stream capacity.
    pub event_capacity: usize,
}

impl ConnectionConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of [`ConnectionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A connection attempt was started.
    Started,
    /// A connection is already open or being established.
    AlreadyActive,
    /// Missing identity, credential or bad URL. Also emitted as an event.
    Rejected(ClientError),
}

/// Result of [`ConnectionManager::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Connection open; the session writes it next.
    Dispatched,
    /// Connection not open; written after the next open.
    Queued,
    /// Queue full; the message was discarded and counted.
    Dropped,
}

/// How a supervisor iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptEnd {
    /// The caller disconnected.
    Cancelled,
    /// The server closed normally; stay closed.
    Closed,
    /// Configuration went missing mid-flight; stay closed.
    Terminal,
    /// Transport failure; run the reconnect policy.
    Retry,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`ConnectionManager`].
///
/// # Example
///
/// ```rust,no_run
/// use market_feed_client::application::ports::StaticCredentials;
/// use market_feed_client::infrastructure::feed::connection::ConnectionManager;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let manager = ConnectionManager::builder("wss://feed.example.com/ws".parse()?)
///     .credentials(Arc::new(StaticCredentials::new("token")))
///     .build();
///
/// manager.connect("user-1");
/// manager.subscribe(&["AAPL"], &["quotes"]);
/// # manager.disconnect("done").await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManagerBuilder {
    config: ConnectionConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    clock: Option<SharedClock>,
    schema: Option<Arc<dyn MessageSchema>>,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl ConnectionManagerBuilder {
    /// Start from a full configuration.
    #[must_use]
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: None,
            credentials: None,
            clock: None,
            schema: None,
            probe: None,
        }
    }

    /// Transport adapter (default: WebSocket).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Credential source (default: `FEED_CLIENT_TOKEN`).
    #[must_use]
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Clock (default: system clock).
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Wire schema (default: JSON envelope).
    #[must_use]
    pub fn schema(mut self, schema: Arc<dyn MessageSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Pre-connect probe (default: none).
    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Backoff policy.
    #[must_use]
    pub const fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    /// Heartbeat timers.
    #[must_use]
    pub const fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Outbound queue capacity.
    #[must_use]
    pub const fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.config.outbox_capacity = capacity;
        self
    }

    /// Build the manager. Nothing connects until [`ConnectionManager::connect`].
    #[must_use]
    pub fn build(self) -> ConnectionManager {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let schema = self
            .schema
            .unwrap_or_else(|| Arc::new(JsonEnvelopeSchema::default()));
        let cache = Arc::new(DataCache::new(Arc::clone(&clock)));
        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&clock)));
        let metrics = Arc::new(MetricsCollector::new());
        let events = Arc::new(EventBus::new(self.config.event_capacity));
        let router = MessageRouter::new(
            schema.clone(),
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::clone(&events),
            Arc::clone(&clock),
        );
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        ConnectionManager {
            inner: Arc::new(Inner {
                outbox: Outbox::new(self.config.outbox_capacity),
                config: self.config,
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(WebSocketTransport::new())),
                credentials: self
                    .credentials
                    .unwrap_or_else(|| Arc::new(EnvCredentials::default())),
                probe: self.probe,
                clock,
                schema,
                cache,
                registry,
                metrics,
                events,
                router,
                unsent: Mutex::new(None),
                heartbeat: Arc::new(HeartbeatState::new()),
                state: RwLock::new(ConnectionState::Idle),
                state_tx,
                supervisor: Mutex::new(None),
                supervising: AtomicBool::new(false),
                identity: RwLock::new(None),
                session_id: RwLock::new(None),
                disconnect_reason: Mutex::new(None),
            }),
        }
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

/// Resilient connection to a market data feed.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    probe: Option<Arc<dyn HealthProbe>>,
    clock: SharedClock,
    schema: Arc<dyn MessageSchema>,
    cache: Arc<DataCache>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<MetricsCollector>,
    events: Arc<EventBus>,
    router: MessageRouter,
    outbox: Arc<Outbox>,
    /// Dequeued message whose write failed; goes out first next session.
    unsent: Mutex<Option<OutboxMessage>>,
    heartbeat: Arc<HeartbeatState>,
    state: RwLock<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    supervisor: Mutex<Option<Supervisor>>,
    supervising: AtomicBool,
    identity: RwLock<Option<String>>,
    session_id: RwLock<Option<Uuid>>,
    disconnect_reason: Mutex<Option<String>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url.as_str())
            .field("state", &self.state())
            .field("queued", &self.inner.outbox.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Builder with defaults for `url`.
    #[must_use]
    pub fn builder(url: Url) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::from_config(ConnectionConfig::new(url))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start connecting as `identity`. An empty identity falls back to the
    /// token's identity claim.
    ///
    /// No-op while connecting, open, or waiting to reconnect. Must be called
    /// from within a Tokio runtime.
    pub fn connect(&self, identity: &str) -> ConnectOutcome {
        let inner = &self.inner;

        if inner.state().is_active() || inner.supervising.load(Ordering::SeqCst) {
            tracing::debug!(state = %inner.state(), "Connect ignored, already active");
            return ConnectOutcome::AlreadyActive;
        }

        let resolved = inner
            .credentials
            .token()
            .ok_or_else(|| ClientError::Configuration("no bearer token available".into()))
            .and_then(|token| {
                let identity = resolve_identity(identity, &token)?;
                build_connection_url(&inner.config.url, &identity, &token)?;
                Ok(identity)
            });
        let identity = match resolved {
            Ok(identity) => identity,
            Err(err) => {
                inner.report_error(&err);
                return ConnectOutcome::Rejected(err);
            }
        };

        if inner.supervising.swap(true, Ordering::SeqCst) {
            return ConnectOutcome::AlreadyActive;
        }
        if !inner.transition(ConnectionState::Connecting) {
            inner.supervising.store(false, Ordering::SeqCst);
            return ConnectOutcome::AlreadyActive;
        }

        *inner.identity.write() = Some(identity.clone());
        *inner.disconnect_reason.lock() = None;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(inner).supervise(identity, cancel.clone()));
        *inner.supervisor.lock() = Some(Supervisor { cancel, handle });

        ConnectOutcome::Started
    }

    /// Close the connection normally and stop reconnecting. Queued messages
    /// are discarded. Returns once the supervisor task has finished.
    pub async fn disconnect(&self, reason: &str) {
        let inner = &self.inner;
        let supervisor = inner.supervisor.lock().take();
        *inner.disconnect_reason.lock() = Some(reason.to_string());

        if let Some(supervisor) = supervisor {
            if inner.state().is_active() {
                inner.transition(ConnectionState::Closing);
            }
            supervisor.cancel.cancel();
            if let Err(e) = supervisor.handle.await {
                tracing::error!(error = %e, "Connection supervisor ended abnormally");
                inner.supervising.store(false, Ordering::SeqCst);
            }
        }

        let cleared = inner.outbox.clear() + usize::from(inner.unsent.lock().take().is_some());
        if cleared > 0 {
            tracing::debug!(cleared, "Discarded queued messages on disconnect");
        }
        if matches!(
            inner.state(),
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        ) {
            inner.transition(ConnectionState::Closed);
        }
        inner.registry.on_disconnected();
        tracing::info!(reason, "Feed client disconnected");
    }

    /// Host went to the background: stop pings and staleness checks.
    pub fn pause(&self) {
        self.inner.heartbeat.set_paused(true);
        tracing::debug!("Heartbeat paused");
    }

    /// Host came back: restart the heartbeat, and reconnect if the
    /// connection closed while paused. `Failed` is left alone; leaving it
    /// takes an explicit `connect`.
    pub fn resume(&self) -> Option<ConnectOutcome> {
        let state = self.state();
        if state.is_open() {
            // Silence while paused is not staleness.
            self.inner.heartbeat.reset();
        }
        self.inner.heartbeat.set_paused(false);
        tracing::debug!("Heartbeat resumed");

        if state != ConnectionState::Closed || self.inner.supervising.load(Ordering::SeqCst)
        {
            return None;
        }
        let identity = self.inner.identity.read().clone()?;
        Some(self.connect(&identity))
    }

    /// Tear everything down. Equivalent to `disconnect` with a teardown
    /// reason.
    pub async fn cleanup(&self) {
        self.disconnect(TEARDOWN_REASON).await;
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Send a message now if open, otherwise queue it for the next open.
    pub fn send(&self, message: OutboundMessage) -> SendStatus {
        self.inner.enqueue(message)
    }

    /// Add desired subscriptions. The subscribe frame goes out immediately
    /// when open; otherwise it is part of the replay on the next open.
    pub fn subscribe<S: AsRef<str>, C: AsRef<str>>(
        &self,
        symbols: &[S],
        channels: &[C],
    ) -> SubscribeOutcome {
        let outcome = self.inner.registry.subscribe(symbols, channels);
        if let Some(request) = &outcome.request {
            self.inner.enqueue(OutboundMessage::Subscribe {
                symbols: request.symbols.clone(),
                channels: request.channels.clone(),
            });
        }
        outcome
    }

    /// Drop subscriptions. The unsubscribe frame is sent or queued
    /// regardless of connection state.
    pub fn unsubscribe<S: AsRef<str>>(&self, symbols: &[S]) -> Option<SendStatus> {
        let symbols = self.inner.registry.unsubscribe(symbols);
        if symbols.is_empty() {
            return None;
        }
        Some(self.inner.enqueue(OutboundMessage::Unsubscribe { symbols }))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Desired subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.registry.list()
    }

    /// Subscription registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Latest-value cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<DataCache> {
        &self.inner.cache
    }

    /// Metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Event bus.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Identifier of the current or last session.
    #[must_use]
    pub fn session_id(&self) -> Option<Uuid> {
        *self.inner.session_id.read()
    }

    /// Identity used for the current or last connection.
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        self.inner.identity.read().clone()
    }

    /// Messages waiting in the outbox.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.outbox.len() + usize::from(self.inner.unsent.lock().is_some())
    }

    /// Whether the heartbeat is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.heartbeat.is_paused()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}

// =============================================================================
// Supervisor
// =============================================================================

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Apply a transition if the table allows it.
    fn transition(&self, to: ConnectionState) -> bool {
        let from = {
            let mut state = self.state.write();
            let from = *state;
            if from == to {
                return false;
            }
            if !from.can_transition_to(to) {
                tracing::warn!(%from, %to, "Rejected invalid connection state transition");
                return false;
            }
            *state = to;
            self.state_tx.send_replace(to);
            from
        };
        tracing::debug!(%from, %to, "Connection state changed");
        self.events.emit(ClientEvent::StateChanged { from, to });
        true
    }

    fn report_error(&self, err: &ClientError) {
        self.metrics.record_error();
        tracing::warn!(kind = err.kind(), error = %err, "Feed client error");
        self.events.emit(ClientEvent::Error(err.clone()));
    }

    fn enqueue(&self, message: OutboundMessage) -> SendStatus {
        let open = self.state().is_open();
        match self
            .outbox
            .push(OutboxMessage::new(message, self.clock.now()))
        {
            Ok(()) if open => SendStatus::Dispatched,
            Ok(()) => SendStatus::Queued,
            Err(rejected) => {
                self.metrics.record_dropped();
                tracing::warn!(
                    action = rejected.action(),
                    capacity = self.outbox.capacity(),
                    "Outbox full, dropping message"
                );
                self.events.emit(ClientEvent::MessageDropped {
                    reason: DropReason::OutboxFull,
                    detail: format!("outbox full, dropped {}", rejected.action()),
                });
                SendStatus::Dropped
            }
        }
    }

    /// Connect, run, back off, repeat.
    async fn supervise(self: Arc<Self>, identity: String, cancel: CancellationToken) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect);
        let mut outbox = self.outbox.take_receiver();
        let mut failed_after = None;

        loop {
            match self.attempt(&identity, &cancel, &mut outbox, &mut policy).await {
                AttemptEnd::Cancelled | AttemptEnd::Closed | AttemptEnd::Terminal => break,
                AttemptEnd::Retry if cancel.is_cancelled() => break,
                AttemptEnd::Retry => {}
            }

            let Some(delay) = policy.next_delay() else {
                failed_after = Some(policy.attempt_count());
                break;
            };
            let attempt = policy.attempt_count();
            self.metrics.record_reconnect();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to feed"
            );
            self.events
                .emit(ClientEvent::Reconnecting { attempt, delay });

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Feed client cancelled during reconnect delay");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if !self.transition(ConnectionState::Connecting) {
                break;
            }
        }

        self.outbox.restore_receiver(outbox);

        // Failed must land before a new connect can start.
        let failed = failed_after.filter(|_| self.transition(ConnectionState::Failed));
        self.supervising.store(false, Ordering::SeqCst);

        if let Some(attempts) = failed {
            tracing::error!(attempts, "Reconnect attempts exhausted, giving up");
            self.events.emit(ClientEvent::ReconnectFailed { attempts });
        }
    }

    /// One connection attempt, including the session if it opens.
    async fn attempt(
        &self,
        identity: &str,
        cancel: &CancellationToken,
        outbox: &mut OutboxReceiver,
        policy: &mut ReconnectPolicy,
    ) -> AttemptEnd {
        let target = self
            .credentials
            .token()
            .ok_or_else(|| ClientError::Configuration("no bearer token available".into()))
            .and_then(|token| {
                build_connection_url(&self.config.url, identity, &token).map_err(ClientError::from)
            });
        let url = match target {
            Ok(url) => url,
            Err(err) => {
                self.report_error(&err);
                self.transition(ConnectionState::Closed);
                return AttemptEnd::Terminal;
            }
        };

        if let Some(probe) = &self.probe {
            let checked = tokio::select! {
                () = cancel.cancelled() => return AttemptEnd::Cancelled,
                checked = probe.check() => checked,
            };
            if let Err(e) = checked {
                return self.attempt_failed(&e.into());
            }
        }

        tracing::info!(url = %redact_url(&url), "Connecting to feed");
        let opened = tokio::select! {
            () = cancel.cancelled() => return AttemptEnd::Cancelled,
            opened = tokio::time::timeout(self.config.connect_timeout, self.transport.open(&url)) => opened,
        };
        let conn = match opened {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return self.attempt_failed(&e.into()),
            Err(_) => {
                return self.attempt_failed(&ClientError::ConnectTimeout(self.config.connect_timeout));
            }
        };

        self.run_session(conn, cancel, outbox, policy).await
    }

    fn attempt_failed(&self, err: &ClientError) -> AttemptEnd {
        self.report_error(err);
        self.transition(ConnectionState::Closed);
        AttemptEnd::Retry
    }

    async fn run_session(
        &self,
        mut conn: Box<dyn TransportConnection>,
        cancel: &CancellationToken,
        outbox: &mut OutboxReceiver,
        policy: &mut ReconnectPolicy,
    ) -> AttemptEnd {
        if !self.transition(ConnectionState::Open) {
            let _ = conn.close(CLOSE_NORMAL, "connection abandoned").await;
            return AttemptEnd::Cancelled;
        }
        policy.reset();

        let session_id = Uuid::new_v4();
        *self.session_id.write() = Some(session_id);
        tracing::info!(%session_id, "Connected to feed");
        self.events.emit(ClientEvent::Connected { session_id });

        self.heartbeat.reset();
        let heartbeat_cancel = cancel.child_token();
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(8);
        let heartbeat = tokio::spawn(
            HeartbeatMonitor::new(
                self.config.heartbeat,
                Arc::clone(&self.heartbeat),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );

        let end = self
            .session_loop(conn.as_mut(), cancel, outbox, &mut heartbeat_rx)
            .await;

        heartbeat_cancel.cancel();
        let _ = heartbeat.await;
        self.registry.on_disconnected();
        end
    }

    async fn session_loop(
        &self,
        conn: &mut dyn TransportConnection,
        cancel: &CancellationToken,
        outbox: &mut OutboxReceiver,
        heartbeat_rx: &mut mpsc::Receiver<HeartbeatEvent>,
    ) -> AttemptEnd {
        // Offline backlog first, then restore subscriptions.
        let retained = self.unsent.lock().take();
        if let Some(queued) = retained
            && let Err(e) = self.write_queued(conn, queued).await
        {
            return self.transport_lost(&e);
        }
        while let Ok(queued) = outbox.try_recv() {
            if let Err(e) = self.write_queued(conn, queued).await {
                return self.transport_lost(&e);
            }
        }
        let replay = self.registry.on_reconnected();
        if !replay.is_empty() {
            tracing::info!(frames = replay.len(), "Restoring subscriptions");
        }
        for request in replay {
            let message = OutboundMessage::Subscribe {
                symbols: request.symbols,
                channels: request.channels,
            };
            if let Err(e) = self.write(conn, &message).await {
                return self.transport_lost(&e);
            }
        }

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let reason = self
                        .disconnect_reason
                        .lock()
                        .clone()
                        .unwrap_or_else(|| TEARDOWN_REASON.to_string());
                    if let Err(e) = conn.close(CLOSE_NORMAL, &reason).await {
                        tracing::debug!(error = %e, "Close frame not delivered");
                    }
                    self.events.emit(ClientEvent::Disconnected {
                        code: Some(CLOSE_NORMAL),
                        reason,
                    });
                    return AttemptEnd::Cancelled;
                }

                Some(event) = heartbeat_rx.recv() => match event {
                    HeartbeatEvent::SendPing => {
                        let timestamp = self.clock.now_millis();
                        self.router.record_ping(timestamp);
                        if let Err(e) = self.write(conn, &OutboundMessage::Ping { timestamp }).await {
                            return self.transport_lost(&e);
                        }
                    }
                    HeartbeatEvent::Stale { silent_for } => {
                        let reason = format!("no data for {}s", silent_for.as_secs());
                        self.transition(ConnectionState::Closing);
                        if let Err(e) = conn.close(CLOSE_STALE, &reason).await {
                            tracing::debug!(error = %e, "Close frame not delivered");
                        }
                        self.report_error(&ClientError::Transport(format!("stale connection: {reason}")));
                        self.transition(ConnectionState::Closed);
                        self.events.emit(ClientEvent::Disconnected {
                            code: Some(CLOSE_STALE),
                            reason,
                        });
                        return AttemptEnd::Retry;
                    }
                },

                Some(queued) = outbox.recv() => {
                    if let Err(e) = self.write_queued(conn, queued).await {
                        return self.transport_lost(&e);
                    }
                }

                frame = conn.recv() => match frame {
                    Some(Ok(TransportFrame::Text(text))) => {
                        self.heartbeat.record_message();
                        self.router.route(&text);
                    }
                    Some(Ok(TransportFrame::Close { code, reason })) => {
                        tracing::info!(code, reason = %reason, "Feed closed the connection");
                        self.transition(ConnectionState::Closed);
                        self.events.emit(ClientEvent::Disconnected {
                            code: Some(code),
                            reason,
                        });
                        return if code == CLOSE_NORMAL {
                            AttemptEnd::Closed
                        } else {
                            AttemptEnd::Retry
                        };
                    }
                    Some(Err(e)) => return self.transport_lost(&e),
                    None => return self.transport_lost(&TransportError::Closed),
                },
            }
        }
    }

    /// Encode and write one message. Encoding failures are counted as drops
    /// and are not transport errors.
    async fn write(
        &self,
        conn: &mut dyn TransportConnection,
        message: &OutboundMessage,
    ) -> Result<(), TransportError> {
        let text = match self.schema.encode(message) {
            Ok(text) => text,
            Err(e) => {
                self.metrics.record_dropped();
                tracing::warn!(action = message.action(), error = %e, "Dropping unencodable message");
                self.events.emit(ClientEvent::MessageDropped {
                    reason: DropReason::Encode,
                    detail: e.to_string(),
                });
                return Ok(());
            }
        };
        conn.send(text).await?;
        self.metrics.record_sent();
        tracing::trace!(action = message.action(), "Sent message");
        Ok(())
    }

    /// Write a dequeued message, keeping it for the next session if the
    /// transport fails.
    async fn write_queued(
        &self,
        conn: &mut dyn TransportConnection,
        queued: OutboxMessage,
    ) -> Result<(), TransportError> {
        let result = self.write(conn, &queued.message).await;
        if result.is_err() {
            *self.unsent.lock() = Some(queued);
        }
        result
    }

    fn transport_lost(&self, err: &TransportError) -> AttemptEnd {
        self.report_error(&err.clone().into());
        self.transition(ConnectionState::Closed);
        self.events.emit(ClientEvent::Disconnected {
            code: None,
            reason: err.to_string(),
        });
        AttemptEnd::Retry
    }
}
