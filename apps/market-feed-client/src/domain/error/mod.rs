//! Client Error Taxonomy
//!
//! Every failure the client can observe is one of these kinds. None of them
//! ever escape the public API as a `Result::Err` for transient conditions:
//! they are emitted on the event bus and counted instead.
//!
//! | Kind            | Recovery                                   |
//! |-----------------|--------------------------------------------|
//! | `Configuration` | terminal for the attempt, caller retries   |
//! | `ConnectTimeout`| reconnect policy                           |
//! | `Transport`     | reconnect policy                           |
//! | `Parse`         | frame dropped and counted                  |
//! | `Validation`    | frame dropped and counted                  |
//! | `Server`        | surfaced as event, stream continues        |

use std::time::Duration;

/// Errors observed by the feed client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Missing endpoint, identity, or credential.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport did not open within the connect timeout.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound frame could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Inbound frame decoded but is missing required data.
    #[error("validation error: {0}")]
    Validation(String),

    /// Explicit error frame sent by the feed.
    #[error("server error: {0}")]
    Server(String),
}

impl ClientError {
    /// Short label used for logs and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Server(_) => "server",
        }
    }

    /// Whether this error should drive the reconnect policy.
    #[must_use]
    pub const fn triggers_reconnect(&self) -> bool {
        matches!(self, Self::ConnectTimeout(_) | Self::Transport(_))
    }
}
