//! Feed Connection Adapters
//!
//! Everything needed to hold a resilient connection to a push-based market
//! data feed:
//!
//! - **Connection**: state machine, supervisor task, session loop
//! - **Transport**: WebSocket adapter (`tokio-tungstenite`)
//! - **Codec**: JSON envelope with configurable field names
//! - **Heartbeat / Reconnect**: liveness and backoff
//! - **Outbox**: bounded queue for messages sent while offline
//! - **Probe**: optional pre-connect HTTP health check

pub mod auth;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod outbox;
pub mod probe;
pub mod reconnect;
pub mod transport;

pub use auth::{AuthError, build_connection_url, resolve_identity, user_id_hint};
pub use codec::JsonEnvelopeSchema;
pub use connection::{
    ConnectOutcome, ConnectionConfig, ConnectionManager, ConnectionManagerBuilder, SendStatus,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatMonitor, HeartbeatState};
pub use messages::{EnvelopeFields, MessageTypes};
pub use outbox::{Outbox, OutboxMessage};
pub use probe::{HttpHealthProbe, derive_health_url};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::WebSocketTransport;
