//! Transport Port (Driven Port)
//!
//! A bidirectional text-frame connection. The connection manager only ever
//! sees this interface, so the WebSocket adapter can be swapped for a
//! scripted transport in tests.

use async_trait::async_trait;
use url::Url;

use crate::domain::error::ClientError;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Closure issued by the client when the heartbeat finds the stream stale.
pub const CLOSE_STALE: u16 = 4000;

/// A frame read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// UTF-8 text payload.
    Text(String),
    /// The peer closed the connection.
    Close {
        /// Close code (1005 when the peer sent none).
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not establish the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// An open connection.
#[async_trait]
pub trait TransportConnection: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Read the next frame. `None` means the stream ended without a close
    /// frame.
    async fn recv(&mut self) -> Option<Result<TransportFrame, TransportError>>;

    /// Close the connection with a code and reason.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Factory for connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    async fn open(&self, url: &Url) -> Result<Box<dyn TransportConnection>, TransportError>;
}
