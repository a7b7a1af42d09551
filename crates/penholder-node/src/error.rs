//! Node error types.

use penholder_core::CoordinatorError;
use penholder_lockfile::LockError;
use penholder_proto::{ProtoError, UsernameError};
use thiserror::Error;

/// Errors that end a node run.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Socket or terminal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or encoding failed on a link.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// The coordinator refused the startup operation.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// The shared lock file could not be used.
    #[error("lock file error: {0}")]
    Lock(#[from] LockError),

    /// The configured display name is not usable.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// The host did not open the connection with an identity assignment.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// What the host sent instead.
        reason: String,
    },
}
