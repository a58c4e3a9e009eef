//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Feed connection: state machine, WebSocket transport, codec, heartbeat.
pub mod feed;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics bridge.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
