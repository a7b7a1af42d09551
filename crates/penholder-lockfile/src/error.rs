//! Lock-file error types.

use penholder_proto::Username;
use thiserror::Error;

/// Errors from lock-file operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Reading or writing the lock file failed.
    #[error("lock file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be serialized.
    #[error("failed to encode lock record: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nobody has joined; there is no lock to act on.
    #[error("no lock file present")]
    NoLock,

    /// The local user is not listed in the lock file.
    #[error("{username} has not joined")]
    NotMember {
        /// Local user.
        username: Username,
    },

    /// Operation requires holding the lock.
    #[error("only the lock owner can do that; {owner} holds the lock")]
    NotOwner {
        /// Current owner.
        owner: Username,
    },

    /// Caller already holds the lock.
    #[error("you already hold the lock")]
    AlreadyOwner,

    /// Target is not another member.
    #[error("{username} is not another member")]
    InvalidTarget {
        /// Rejected target.
        username: Username,
    },
}

impl LockError {
    /// Returns true if the lock file cannot be used at all.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Encode(_) => true,
            Self::NoLock
            | Self::NotMember { .. }
            | Self::NotOwner { .. }
            | Self::AlreadyOwner
            | Self::InvalidTarget { .. } => false,
        }
    }
}
