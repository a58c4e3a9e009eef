//! Heartbeat Monitor
//!
//! Two independent timers run while a session is open:
//!
//! - every `ping_interval` the session is asked to send a `ping`;
//! - every `check_interval` the time since the last inbound frame of any
//!   kind is compared with `stale_threshold`. A stale stream ends the
//!   monitor with [`HeartbeatEvent::Stale`] and the session forces a
//!   reconnect.
//!
//! While paused neither timer acts. Inbound frames are still read and
//! still count as activity.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Interval between staleness checks.
    pub check_interval: Duration,
    /// Silence after which the connection is considered dead.
    pub stale_threshold: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(120),
        }
    }
}

/// Events emitted by the heartbeat monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
    /// Nothing received for longer than the threshold.
    Stale {
        /// Time since the last inbound frame.
        silent_for: Duration,
    },
}

/// State shared between the monitor and the session reading frames.
#[derive(Debug)]
pub struct HeartbeatState {
    last_message: RwLock<Instant>,
    paused: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_message: RwLock::new(Instant::now()),
            paused: AtomicBool::new(false),
        }
    }

    /// Record that a frame arrived.
    pub fn record_message(&self) {
        *self.last_message.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_message(&self) -> Duration {
        self.last_message.read().elapsed()
    }

    /// Suspend or resume pings and staleness checks.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Whether the monitor is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Reset timers for a new session. The pause flag is left alone.
    pub fn reset(&self) {
        *self.last_message.write() = Instant::now();
    }
}

/// Heartbeat monitor for one session.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the session goes away, or the stream is stale.
    pub async fn run(self) {
        let start = Instant::now();
        let mut ping = tokio::time::interval_at(
            start + self.config.ping_interval,
            self.config.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut check = tokio::time::interval_at(
            start + self.config.check_interval,
            self.config.check_interval,
        );
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    break;
                }
                _ = ping.tick() => {
                    if self.state.is_paused() {
                        continue;
                    }
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
                _ = check.tick() => {
                    if self.state.is_paused() {
                        continue;
                    }
                    let silent_for = self.state.time_since_message();
                    if silent_for > self.config.stale_threshold {
                        tracing::warn!(
                            silent_secs = silent_for.as_secs(),
                            threshold_secs = self.config.stale_threshold.as_secs(),
                            "Feed connection is stale"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Stale { silent_for }).await;
                        break;
                    }
                }
            }
        }
    }
}
