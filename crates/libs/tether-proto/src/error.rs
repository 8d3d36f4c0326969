use serde::{Deserialize, Serialize};

use crate::types::{BlobReference, ConnectionId};

/// Outcome of a failed remote call.
///
/// Every variant except `DuplicateCorrelationId` describes a condition the
/// caller is expected to handle (retry, degrade or surface). A duplicate id is
/// an id-generation defect: it aborts the one call and is logged at error level.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum InvokeError {
    #[error("not connected: {target}")]
    NotConnected { target: String },

    #[error("capacity exceeded: {max_concurrent} calls already in flight")]
    CapacityExceeded { max_concurrent: usize },

    #[error("timeout: {method} after {elapsed_ms}ms")]
    Timeout { method: String, elapsed_ms: u64 },

    #[error("duplicate correlation id: {id}")]
    DuplicateCorrelationId { id: String },

    #[error("remote fault: {message}")]
    RemoteFault { message: String },

    #[error("serialization fault: {message}")]
    SerializationFault { message: String },

    #[error("blob unavailable: {reason}")]
    BlobUnavailable { reason: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl InvokeError {
    /// Returns `true` for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::Timeout { .. } | Self::Transport { .. }
        )
    }

    /// Returns `true` for programming defects rather than runtime conditions.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::DuplicateCorrelationId { .. })
    }

    /// Short text a consuming application can show to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotConnected { .. } | Self::Timeout { .. } | Self::Transport { .. } => {
                "recipient unavailable"
            }
            Self::CapacityExceeded { .. } => "try again later",
            _ => "request failed",
        }
    }

    pub fn not_connected(target: impl Into<String>) -> Self {
        Self::NotConnected { target: target.into() }
    }

    pub fn serialization(message: impl std::fmt::Display) -> Self {
        Self::SerializationFault { message: message.to_string() }
    }

    pub fn blob_unavailable(reason: impl Into<String>) -> Self {
        Self::BlobUnavailable { reason: reason.into() }
    }
}

/// Errors reported by a [`TransportAdapter`](crate::TransportAdapter) send.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("link closed: {0}")]
    Closed(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("transport io error: {0}")]
    Io(String),
}

impl From<TransportError> for InvokeError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::UnknownConnection(id) => Self::not_connected(id.to_string()),
            TransportError::Encode(message) => Self::SerializationFault { message },
            other => Self::Transport { message: other.to_string() },
        }
    }
}

/// Errors reported by a [`BlobStore`](crate::BlobStore).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobReference),

    #[error("invalid blob reference: {0}")]
    InvalidReference(String),

    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("blob read timed out: {0}")]
    TimedOut(BlobReference),

    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BlobError> for InvokeError {
    fn from(err: BlobError) -> Self {
        Self::blob_unavailable(err.to_string())
    }
}
