#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Feed Client - Resilient Market Data Connection
//!
//! Holds one logical WebSocket connection to a push-based market data
//! feed. Reconnects with exponential backoff, keeps the connection honest
//! with heartbeats, replays subscriptions after every reconnect, and keeps
//! the latest value per symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: State machine, subscriptions, cache, metrics, errors
//!   - `connection`: Lifecycle states and legal transitions
//!   - `subscription`: Desired versus confirmed subscriptions
//!   - `cache`: Latest value per symbol with staleness queries
//!
//! - **Application**: Ports, events, routing
//!   - `ports`: Transport, credentials, schema, health probe, clock
//!   - `events`: Typed publish/subscribe bus
//!   - `services`: Inbound message routing
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Connection manager, WebSocket transport, JSON codec
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics` / `telemetry`: Prometheus and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!             ┌──────────────┐   frames   ┌───────────────┐
//! Feed WS ───►│  Connection  │───────────►│ MessageRouter │──► DataCache
//!         ◄───│   Manager    │            └───────┬───────┘
//!  subscribe  └──────┬───────┘                    │
//!  ping/replay       │ state, errors              ▼
//!                    └───────────────────────► EventBus ──► listeners / streams
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed client types with no I/O.
pub mod domain;

/// Application layer - Ports, events and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{CachedValue, DataCache};
pub use domain::connection::ConnectionState;
pub use domain::error::ClientError;
pub use domain::metrics::{MetricsSnapshot, QualityLevel};
pub use domain::streaming::{MarketDataUpdate, Symbol};
pub use domain::subscription::{
    Subscription, SubscriptionRegistry, SubscriptionStats, SubscriptionStatus,
};

// Events and ports
pub use application::events::{ClientEvent, DropReason, EventBus, ListenerId, Topic};
pub use application::ports::{
    BearerToken, Clock, CredentialProvider, EnvCredentials, ManualClock, MessageSchema,
    StaticCredentials, SystemClock, Transport, TransportConnection,
};

// Feed connection
pub use infrastructure::feed::{
    ConnectOutcome, ConnectionConfig, ConnectionManager, ConnectionManagerBuilder,
    HeartbeatConfig, JsonEnvelopeSchema, ReconnectConfig, SendStatus,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, ServerSettings, SubscriptionSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{init_metrics, install_bridge as install_metrics_bridge};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
