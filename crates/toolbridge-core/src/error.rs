//! Bridge error taxonomy.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Error produced while relaying a request to the remote agent.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// No handle is installed on the bridge link, or its channel is gone.
    #[error("Bridge link absent")]
    LinkAbsent,
    /// The gateway refused to issue a request because no agent is connected.
    #[error("Local PC bridge unavailable: no agent connected")]
    BridgeUnavailable,
    /// The deadline elapsed before a matching reply arrived.
    #[error("Bridge request {id} timed out after {}ms", after.as_millis())]
    Timeout { id: String, after: Duration },
    /// A correlation id was registered twice.
    #[error("Duplicate correlation id: {0}")]
    DuplicateId(String),
    /// The remote agent reported an application error.
    #[error("Remote error: {0}")]
    Remote(Value),
    /// The outbound request could not be encoded.
    #[error("Failed to encode bridge request: {0}")]
    Encode(String),
}

impl BridgeError {
    /// Whether the error means the agent could not be reached at all.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::LinkAbsent | Self::BridgeUnavailable)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(e.to_string())
    }
}
