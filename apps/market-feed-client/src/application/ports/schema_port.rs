//! Message Schema Port
//!
//! Feeds differ in envelope field names, not in what they say. A schema
//! turns raw text into [`InboundMessage`] and [`OutboundMessage`] into
//! text; the connection manager and router never look at wire fields.

use serde_json::Value;

use crate::domain::error::ClientError;
use crate::domain::streaming::Symbol;

/// Decoded inbound frame, before validation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Market data for one symbol. Fields are raw; the router validates them.
    MarketData {
        /// `symbol` field, if it was a string.
        symbol: Option<String>,
        /// `data` field (`Null` when absent).
        data: Value,
        /// `timestamp` field, if present.
        timestamp: Option<Value>,
    },
    /// Server accepted subscriptions.
    SubscriptionConfirmed {
        /// Confirmed symbols.
        symbols: Vec<Symbol>,
    },
    /// Server refused subscriptions.
    SubscriptionDenied {
        /// Refused symbols.
        symbols: Vec<Symbol>,
        /// Optional explanation.
        message: Option<String>,
    },
    /// Server dropped subscriptions.
    UnsubscribeConfirmed {
        /// Dropped symbols.
        symbols: Vec<Symbol>,
    },
    /// Heartbeat reply.
    Pong {
        /// Echoed ping timestamp, if present.
        timestamp: Option<Value>,
    },
    /// Explicit server error.
    Error {
        /// Error text.
        message: String,
    },
    /// Discriminator present but not recognised.
    Unknown {
        /// The discriminator value.
        kind: String,
    },
}

/// Message written to the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Subscribe to symbols on channels.
    Subscribe {
        /// Symbols.
        symbols: Vec<Symbol>,
        /// Channels.
        channels: Vec<String>,
    },
    /// Drop symbols.
    Unsubscribe {
        /// Symbols.
        symbols: Vec<Symbol>,
    },
    /// Heartbeat probe.
    Ping {
        /// Epoch milliseconds at send time.
        timestamp: i64,
    },
}

impl OutboundMessage {
    /// Action label used in logs and the outbox.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Frame is not a well-formed envelope.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Envelope lacks the discriminator field.
    #[error("missing discriminator field '{0}'")]
    MissingDiscriminator(String),

    /// Outbound message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Wire format of a feed.
pub trait MessageSchema: Send + Sync + std::fmt::Debug {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when the frame is not an envelope or has no
    /// discriminator.
    fn decode(&self, raw: &str) -> Result<InboundMessage, CodecError>;

    /// Encode one outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialization fails.
    fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError>;
}
