//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Typed publish/subscribe event bus.
pub mod events;

/// Port interfaces for external systems (transport, credentials, schema).
pub mod ports;

/// Application services (message routing).
pub mod services;
