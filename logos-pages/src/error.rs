//! Error type shared by every client operation.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::protocol::RequestKind;

/// Errors surfaced by the page sync client.
///
/// Remote failures are never retried here; they reach the immediate caller.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server answered a correlated request with a non-null error indicator.
    #[error("remote call {kind} failed: {error}")]
    RemoteCall { kind: RequestKind, error: Value },

    /// No channel is attached, or it closed before the request could be written.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// The channel closed while the request was still waiting for its response.
    #[error("connection closed before a response arrived")]
    Disconnected,

    #[error("request {kind} timed out after {after:?}")]
    Timeout { kind: RequestKind, after: Duration },

    /// A response or event payload did not have the expected shape.
    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("invalid change set: {0}")]
    ChangeSet(String),

    /// Pulled updates must start exactly at the document's local version.
    #[error("update set out of order: local version {local}, pulled from {pulled}")]
    OutOfOrder { local: u64, pulled: u64 },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Payload(e.to_string())
    }
}

impl SyncError {
    /// The raw error indicator when this is a remote failure.
    pub fn remote_error(&self) -> Option<&Value> {
        match self {
            Self::RemoteCall { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
