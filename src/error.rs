//! Error types for the gattcore library.

use thiserror::Error;

use crate::types::{Status, Uuid};

/// The kind of GATT entity an operation failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// A primary service.
    Service,
    /// A characteristic within a service.
    Characteristic,
    /// A descriptor within a characteristic.
    Descriptor,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::Characteristic => write!(f, "characteristic"),
            Self::Descriptor => write!(f, "descriptor"),
        }
    }
}

/// The main error type for gattcore operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The session has no live connection to the peer.
    #[error("device is not connected")]
    NotConnected,

    /// A connect attempt is already in progress.
    #[error("connect already in progress")]
    ConnectInProgress,

    /// The target entity could not be resolved on the peer.
    #[error("{kind} {uuid} not found")]
    NotFound { kind: EntityKind, uuid: Uuid },

    /// The transport rejected the submission synchronously.
    ///
    /// No asynchronous completion will ever arrive for a rejected call.
    #[error("{operation} rejected by transport")]
    Rejected { operation: &'static str },

    /// The transport reported an asynchronous non-success status.
    #[error("{operation} failed with status {status}")]
    Gatt {
        operation: &'static str,
        status: Status,
    },

    /// The connection was torn down while the operation was outstanding.
    #[error("device disconnected")]
    Disconnected,

    /// The connection attempt failed.
    #[error("connection error")]
    ConnectionFailed,

    /// The session task is gone and can no longer accept requests.
    #[error("session closed")]
    Closed,

    /// A UUID string could not be parsed.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),

    /// A peer address string could not be parsed.
    #[error("invalid peer address: {0}")]
    InvalidAddress(String),
}

/// Result type alias for gattcore operations.
pub type Result<T> = std::result::Result<T, Error>;
