//! Connection State Machine
//!
//! The single source of truth for where the client is in its lifecycle.
//!
//! ```text
//!  Idle ──► Connecting ──► Open ──► Closing ──► Closed
//!              │  ▲          │                    │
//!              │  └──────────┼────────────────────┤ (backoff)
//!              ▼             ▼                    ▼
//!            Closed        Closed               Failed
//! ```
//!
//! `Failed` is only reachable from `Closed` once the reconnect policy has
//! run out of attempts. Leaving it requires an explicit `connect`.

use serde::Serialize;

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Never connected.
    #[default]
    Idle,
    /// Transport open in progress.
    Connecting,
    /// Transport open and usable.
    Open,
    /// Caller-initiated close in progress.
    Closing,
    /// Transport closed; a reconnect may be scheduled.
    Closed,
    /// Reconnect attempts exhausted.
    Failed,
}

impl ConnectionState {
    /// Check whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Closed | Self::Failed, Self::Connecting)
                | (Self::Connecting, Self::Open | Self::Closing | Self::Closed)
                | (Self::Open, Self::Closing | Self::Closed)
                | (Self::Closing, Self::Closed)
                | (Self::Closed, Self::Failed)
        )
    }

    /// Whether a connection attempt is underway or established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Whether frames can be written right now.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the client gave up and needs an explicit `connect`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Lowercase name for logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
