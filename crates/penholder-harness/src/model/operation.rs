//! Operations for model-based testing.
//!
//! Operations are everything a user can do to a session. They are generated
//! randomly and applied to both the model and the simulated coordinators.

use arbitrary::Arbitrary;
use penholder_core::CoordinatorError;

/// Peer index (0 is the host). Reduced modulo the world size when applied.
pub type PeerIndex = u8;

/// Display names an operation can use. Small on purpose, so collisions
/// (`NameTaken`) are common.
pub const NAMES: [&str; 4] = ["alice", "bob", "carol", "dave"];

/// Index into [`NAMES`], reduced modulo its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct NameChoice(pub u8);

impl NameChoice {
    /// The chosen name.
    pub fn name(self) -> &'static str {
        NAMES[usize::from(self.0) % NAMES.len()]
    }
}

/// Operations that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Peer starts a new session as `alice`.
    Host {
        /// Peer performing the operation.
        peer: PeerIndex,
    },

    /// Peer asks the host to admit it under a name.
    Join {
        /// Peer joining.
        peer: PeerIndex,
        /// Requested display name.
        name: NameChoice,
    },

    /// Editor hands the token to a member.
    Give {
        /// Peer giving.
        peer: PeerIndex,
        /// Target display name.
        target: NameChoice,
    },

    /// Non-editor asks for the token.
    Request {
        /// Peer asking.
        peer: PeerIndex,
    },

    /// Editor accepts the first pending request.
    Accept {
        /// Peer answering.
        peer: PeerIndex,
    },

    /// Editor declines the first pending request.
    Decline {
        /// Peer answering.
        peer: PeerIndex,
    },

    /// Non-editor takes the token.
    Force {
        /// Peer taking.
        peer: PeerIndex,
    },

    /// Peer leaves (the host ends the session instead).
    Leave {
        /// Peer leaving.
        peer: PeerIndex,
    },

    /// Peer ends the session.
    End {
        /// Peer ending.
        peer: PeerIndex,
    },

    /// Let every pending join time out.
    ExpireJoins,
}

impl Operation {
    /// Same operation with its peer index reduced into `0..size`.
    #[must_use]
    pub fn clamped(self, size: usize) -> Self {
        let size = u8::try_from(size.max(1)).unwrap_or(u8::MAX);
        let clamp = |peer: PeerIndex| peer % size;
        match self {
            Self::Host { peer } => Self::Host { peer: clamp(peer) },
            Self::Join { peer, name } => Self::Join { peer: clamp(peer), name },
            Self::Give { peer, target } => Self::Give { peer: clamp(peer), target },
            Self::Request { peer } => Self::Request { peer: clamp(peer) },
            Self::Accept { peer } => Self::Accept { peer: clamp(peer) },
            Self::Decline { peer } => Self::Decline { peer: clamp(peer) },
            Self::Force { peer } => Self::Force { peer: clamp(peer) },
            Self::Leave { peer } => Self::Leave { peer: clamp(peer) },
            Self::End { peer } => Self::End { peer: clamp(peer) },
            Self::ExpireJoins => Self::ExpireJoins,
        }
    }
}

/// Result of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    /// Operation was accepted locally.
    Ok,

    /// Operation was refused.
    Error(OperationError),
}

impl OperationResult {
    /// Check if operation succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Check if operation failed.
    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

/// Refusals an operation can meet, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Peer is already in or joining a session.
    AlreadyInSession,
    /// No session to join.
    NoSessionFound,
    /// Peer is not in a session.
    NotInSession,
    /// Peer does not hold the token.
    NotEditor,
    /// Peer already holds the token.
    AlreadyEditor,
    /// Target is not another member.
    InvalidTarget,
    /// Only the host may do this.
    NotHost,
    /// Peer's transport cannot host.
    TransportUnavailable,
    /// Nothing to answer.
    NoPendingRequest,
    /// Any other coordinator error.
    Other,
}

impl From<&CoordinatorError> for OperationError {
    fn from(error: &CoordinatorError) -> Self {
        match error {
            CoordinatorError::AlreadyInSession => Self::AlreadyInSession,
            CoordinatorError::NoSessionFound => Self::NoSessionFound,
            CoordinatorError::NotInSession => Self::NotInSession,
            CoordinatorError::NotEditor => Self::NotEditor,
            CoordinatorError::AlreadyEditor => Self::AlreadyEditor,
            CoordinatorError::InvalidTarget { .. } => Self::InvalidTarget,
            CoordinatorError::NotHost => Self::NotHost,
            CoordinatorError::TransportUnavailable => Self::TransportUnavailable,
            CoordinatorError::NameTaken { .. }
            | CoordinatorError::MalformedState { .. }
            | CoordinatorError::InvalidUsername(_)
            | CoordinatorError::Codec { .. } => Self::Other,
        }
    }
}

impl From<Result<(), CoordinatorError>> for OperationResult {
    fn from(result: Result<(), CoordinatorError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(error) => Self::Error(OperationError::from(&error)),
        }
    }
}
