//! Health Probe Port (Driven Port)
//!
//! Optional check run before each connection attempt. A failure counts as a
//! failed attempt.

use async_trait::async_trait;

use crate::domain::error::ClientError;

/// Probe failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// Request could not be made or timed out.
    #[error("health probe request failed: {0}")]
    Request(String),

    /// Endpoint answered with a non-success status.
    #[error("health probe returned status {0}")]
    Status(u16),
}

impl From<ProbeError> for ClientError {
    fn from(err: ProbeError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Checks that the feed's backend is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Run the check.
    async fn check(&self) -> Result<(), ProbeError>;
}
