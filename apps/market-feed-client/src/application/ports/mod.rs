//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: opens text-frame connections to the feed
//! - `CredentialProvider`: supplies the bearer token
//! - `HealthProbe`: optional pre-connect reachability check
//! - `MessageSchema`: wire encoding of feed messages
//! - `Clock`: wall-clock time

mod credential_port;
mod health_probe_port;
mod schema_port;
mod transport_port;

pub use credential_port::{BearerToken, CredentialProvider, EnvCredentials, StaticCredentials};
pub use health_probe_port::{HealthProbe, ProbeError};
pub use schema_port::{CodecError, InboundMessage, MessageSchema, OutboundMessage};
pub use transport_port::{
    CLOSE_NORMAL, CLOSE_STALE, Transport, TransportConnection, TransportError, TransportFrame,
};

pub use crate::domain::clock::{Clock, ManualClock, SharedClock, SystemClock};
