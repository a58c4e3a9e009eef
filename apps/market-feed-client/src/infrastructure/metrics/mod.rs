//! Prometheus Metrics Module
//!
//! Mirrors client events into the `metrics` facade so they can be scraped.
//!
//! # Metrics Categories
//!
//! - **Connection**: state gauge, transitions, disconnects, reconnects
//! - **Messages**: data updates received, messages dropped by reason
//! - **Subscriptions**: confirmations, denials, unsubscribes
//! - **Errors**: errors by kind
//! - **Latency**: ping round trip
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::events::{ClientEvent, EventBus, ListenerId, Topic};
use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder. Later calls return the
/// existing handle.
///
/// # Errors
///
/// Returns an error if another recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Metrics setup errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricsError {
    /// Recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(String),
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "feed_client_connection_state",
        "1 for the current connection state, 0 otherwise"
    );
    describe_counter!(
        "feed_client_state_transitions_total",
        "Connection state transitions by target state"
    );
    describe_counter!(
        "feed_client_disconnects_total",
        "Transport closes by close code"
    );
    describe_counter!(
        "feed_client_reconnects_total",
        "Reconnect attempts scheduled"
    );
    describe_counter!(
        "feed_client_reconnect_failures_total",
        "Times reconnect attempts were exhausted"
    );
    describe_counter!(
        "feed_client_data_updates_total",
        "Validated market data updates received"
    );
    describe_counter!(
        "feed_client_messages_dropped_total",
        "Messages dropped by reason"
    );
    describe_counter!(
        "feed_client_subscription_events_total",
        "Subscription confirmations, denials and unsubscribes"
    );
    describe_counter!("feed_client_errors_total", "Errors by kind");
    describe_histogram!(
        "feed_client_latency_seconds",
        "Ping round-trip latency"
    );
}

const STATES: [ConnectionState; 6] = [
    ConnectionState::Idle,
    ConnectionState::Connecting,
    ConnectionState::Open,
    ConnectionState::Closing,
    ConnectionState::Closed,
    ConnectionState::Failed,
];

// =============================================================================
// Event Bridge
// =============================================================================

/// Register a listener that records every client event as metrics.
pub fn install_bridge(events: &EventBus) -> ListenerId {
    events.on(Topic::All, record_event)
}

/// Record one event.
pub fn record_event(event: &ClientEvent) {
    match event {
        ClientEvent::StateChanged { to, .. } => {
            for state in STATES {
                let value = if state == *to { 1.0 } else { 0.0 };
                gauge!("feed_client_connection_state", "state" => state.as_str()).set(value);
            }
            counter!("feed_client_state_transitions_total", "to" => to.as_str()).increment(1);
        }
        ClientEvent::Disconnected { code, .. } => {
            let code = code.map_or_else(|| "none".to_string(), |c| c.to_string());
            counter!("feed_client_disconnects_total", "code" => code).increment(1);
        }
        ClientEvent::Reconnecting { .. } => {
            counter!("feed_client_reconnects_total").increment(1);
        }
        ClientEvent::ReconnectFailed { .. } => {
            counter!("feed_client_reconnect_failures_total").increment(1);
        }
        ClientEvent::Data(_) => {
            counter!("feed_client_data_updates_total").increment(1);
        }
        ClientEvent::MessageDropped { reason, .. } => {
            counter!("feed_client_messages_dropped_total", "reason" => reason.as_str())
                .increment(1);
        }
        ClientEvent::SubscriptionConfirmed { symbols } => {
            record_subscription("confirmed", symbols.len());
        }
        ClientEvent::SubscriptionDenied { symbols, .. } => {
            record_subscription("denied", symbols.len());
        }
        ClientEvent::Unsubscribed { symbols } => {
            record_subscription("unsubscribed", symbols.len());
        }
        ClientEvent::Error(error) => {
            counter!("feed_client_errors_total", "kind" => error.kind()).increment(1);
        }
        ClientEvent::Latency { latency_ms, .. } => {
            histogram!("feed_client_latency_seconds").record(latency_ms / 1000.0);
        }
        ClientEvent::Connected { .. } => {}
    }
}

fn record_subscription(outcome: &'static str, count: usize) {
    counter!("feed_client_subscription_events_total", "outcome" => outcome)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

// =============================================================================
// Tests
// =============================================================================
