//! Market Feed Client Binary
//!
//! Server-side relay host: connects to the feed, subscribes to the configured
//! symbols, logs what arrives and serves health and metrics.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_CLIENT_WS_URL`: Feed WebSocket URL
//! - `FEED_CLIENT_TOKEN`: Bearer token
//!
//! ## Optional
//! - `FEED_CLIENT_USER_ID`: Identity (default: read from the token)
//! - `FEED_CLIENT_SYMBOLS`: Comma-separated symbols to subscribe on start
//! - `FEED_CLIENT_CHANNELS`: Comma-separated channels (default: quotes)
//! - `FEED_CLIENT_PROBE_ENABLED`: Probe the health endpoint before connecting
//! - `FEED_CLIENT_HEALTH_PORT`: Health check HTTP port (default: 8082, 0 disables)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use market_feed_client::infrastructure::feed::probe::{DEFAULT_PROBE_TIMEOUT, HttpHealthProbe};
use market_feed_client::infrastructure::health::{HealthServer, HealthServerState};
use market_feed_client::{
    ClientConfig, ClientEvent, ConnectOutcome, ConnectionManager, ConnectionManagerBuilder,
    init_metrics, init_telemetry, install_metrics_bridge,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("telemetry setup")?;

    tracing::info!("Starting market feed client");

    let _metrics_handle = init_metrics().context("metrics setup")?;

    let config = ClientConfig::from_env().context("configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let mut builder = ConnectionManagerBuilder::from_config(config.connection());
    if let Some(url) = config.probe_url()? {
        tracing::info!(url = %url, "Pre-connect health probe enabled");
        builder = builder.probe(Arc::new(HttpHealthProbe::new(url, DEFAULT_PROBE_TIMEOUT)?));
    }
    let manager = builder.build();

    install_metrics_bridge(manager.events());
    tokio::spawn(log_events(manager.clone(), shutdown_token.clone()));

    if !config.subscriptions.symbols.is_empty() {
        let outcome = manager.subscribe(
            &config.subscriptions.symbols,
            &config.subscriptions.channels,
        );
        tracing::info!(
            pending = outcome.pending.len(),
            channels = ?config.subscriptions.channels,
            "Startup subscriptions registered"
        );
    }

    match manager.connect(&config.subscriptions.user_id) {
        ConnectOutcome::Rejected(error) => {
            return Err(error).context("connect rejected");
        }
        outcome => tracing::debug!(?outcome, "Connect requested"),
    }

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            manager.clone(),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tracing::info!("Feed client ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, manager.cleanup())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Connection teardown timed out"
        );
    }

    tracing::info!("Feed client stopped");
    Ok(())
}

/// Log client events until shutdown.
async fn log_events(manager: ConnectionManager, shutdown: CancellationToken) {
    let mut events = manager.events().stream();
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.next() => event,
        };
        match event {
            None => break,
            Some(Err(lagged)) => tracing::warn!(error = %lagged, "Event log fell behind"),
            Some(Ok(event)) => log_event(&event),
        }
    }
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::StateChanged { from, to } => {
            tracing::info!(from = %from, to = %to, "Connection state changed");
        }
        ClientEvent::Connected { session_id } => {
            tracing::info!(session_id = %session_id, "Feed connected");
        }
        ClientEvent::Disconnected { code, reason } => {
            tracing::warn!(code = ?code, reason = %reason, "Feed disconnected");
        }
        ClientEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Feed reconnecting");
        }
        ClientEvent::ReconnectFailed { attempts } => {
            tracing::error!(attempts, "Feed reconnect attempts exhausted");
        }
        ClientEvent::Data(update) => {
            tracing::debug!(
                symbol = %update.symbol,
                price = ?update.price(),
                timestamp_ms = ?update.timestamp_ms,
                "Market data"
            );
        }
        ClientEvent::SubscriptionConfirmed { symbols } => {
            tracing::info!(?symbols, "Subscriptions confirmed");
        }
        ClientEvent::SubscriptionDenied { symbols, message } => {
            tracing::warn!(?symbols, message = ?message, "Subscriptions denied");
        }
        ClientEvent::Unsubscribed { symbols } => {
            tracing::info!(?symbols, "Unsubscribed");
        }
        ClientEvent::Error(error) => {
            tracing::error!(kind = error.kind(), error = %error, "Feed error");
        }
        ClientEvent::MessageDropped { reason, detail } => {
            tracing::debug!(reason = reason.as_str(), detail = %detail, "Message dropped");
        }
        ClientEvent::Latency {
            latency_ms,
            quality,
        } => {
            tracing::debug!(latency_ms, quality = quality.as_str(), "Round trip");
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        ws_url = %config.ws_url,
        health_port = config.server.health_port,
        probe_enabled = config.probe_enabled,
        symbols = config.subscriptions.symbols.len(),
        "Configuration loaded"
    );
    tracing::debug!(
        connect_timeout_secs = config.connect_timeout.as_secs(),
        reconnect_base_ms = config.reconnect.base_delay.as_millis(),
        reconnect_max_ms = config.reconnect.max_delay.as_millis(),
        max_attempts = config.reconnect.max_attempts,
        ping_interval_secs = config.heartbeat.ping_interval.as_secs(),
        stale_threshold_secs = config.heartbeat.stale_threshold.as_secs(),
        outbox_capacity = config.outbox_capacity,
        "Connection tuning"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
