//! Domain Layer - Core feed client types and business logic.
//!
//! This layer holds the connection state machine, subscription bookkeeping,
//! the latest-value cache and connection metrics. Nothing here touches the
//! network or the async runtime.

/// Latest-value cache with staleness queries.
pub mod cache;

/// Injected wall-clock time.
pub mod clock;

/// Connection state machine.
pub mod connection;

/// Client error taxonomy.
pub mod error;

/// Counters, latency and quality level.
pub mod metrics;

/// Market data payload types.
pub mod streaming;

/// Desired versus confirmed subscriptions.
pub mod subscription;
