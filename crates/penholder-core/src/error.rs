//! Coordinator error types.

use penholder_proto::{PeerId, Topic, Username, UsernameError};
use thiserror::Error;

/// Errors from coordinator operations.
///
/// Every error leaves the session state exactly as it was before the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// Operation requires the idle state but a session is active or joining.
    #[error("already in a session")]
    AlreadyInSession,

    /// No host session answered the join.
    #[error("no session found")]
    NoSessionFound,

    /// Requested username is already a member.
    #[error("username {username} is already taken")]
    NameTaken {
        /// The contested name.
        username: Username,
    },

    /// Operation requires holding the write token.
    #[error("only the current editor can do that")]
    NotEditor,

    /// No collaboration transport is attached.
    #[error("collaboration transport unavailable")]
    TransportUnavailable,

    /// Replicated or persisted state failed structural validation.
    #[error("malformed session state: {reason}")]
    MalformedState {
        /// Which check failed.
        reason: String,
    },

    /// Operation requires an active session.
    #[error("not in a session")]
    NotInSession,

    /// Operation requires the session host.
    #[error("only the session host can do that")]
    NotHost,

    /// Caller already holds the write token.
    #[error("you already have write access")]
    AlreadyEditor,

    /// Target of a transfer is not another member of the session.
    #[error("{username} is not another member of this session")]
    InvalidTarget {
        /// The rejected target.
        username: Username,
    },

    /// Display name failed validation.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] UsernameError),

    /// An outgoing message could not be encoded.
    #[error("failed to encode message: {reason}")]
    Codec {
        /// Encoder error.
        reason: String,
    },
}

impl CoordinatorError {
    /// Returns true if this error ends the local session.
    ///
    /// Only a failure to even reach a host is fatal to the attempt. Everything
    /// else is a refused operation: the user sees the message and the session
    /// carries on.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::NoSessionFound | Self::TransportUnavailable => true,

            Self::AlreadyInSession
            | Self::NameTaken { .. }
            | Self::NotEditor
            | Self::MalformedState { .. }
            | Self::NotInSession
            | Self::NotHost
            | Self::AlreadyEditor
            | Self::InvalidTarget { .. }
            | Self::InvalidUsername(_)
            | Self::Codec { .. } => false,
        }
    }
}

/// Errors from relay frame processing.
///
/// The offending frame is dropped; none of these affect the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A relay request reached a peer that cannot re-publish.
    #[error("relay request on {topic} from {origin} reached a non-relaying peer")]
    NotRelayPoint {
        /// Requested topic.
        topic: Topic,
        /// Sender of the request.
        origin: PeerId,
    },

    /// A non-host tried to publish on a host-only topic.
    #[error("{origin} may not publish on {topic}")]
    Unauthorized {
        /// Restricted topic.
        topic: Topic,
        /// Offending peer.
        origin: PeerId,
    },

    /// A relay request named no topic, or another relay request.
    #[error("invalid relay request topic {topic} from {origin}")]
    InvalidRelayTopic {
        /// Offending topic.
        topic: Topic,
        /// Sender of the request.
        origin: PeerId,
    },
}
