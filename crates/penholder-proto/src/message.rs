//! Protocol messages and the frames that carry them.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    error::ProtoError,
    identity::{PeerId, Username},
    topic::Topic,
};

/// Full replicated session state, as shipped to a joining peer.
///
/// New joiners receive the whole snapshot in one message; there is no
/// incremental catch-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Peer that created the session. Never changes.
    pub host: Username,
    /// Current sole holder of the write token.
    pub editor: Username,
    /// Everyone currently joined, host included.
    pub users: BTreeSet<Username>,
    /// Attribution map from transport identity to display name.
    pub peers: BTreeMap<PeerId, Username>,
    /// Peers known to have left. A join for one of these is stale.
    #[serde(default)]
    pub departed: BTreeSet<PeerId>,
    /// Names that left and have not rejoined. A transfer to one of these
    /// resolves to the host.
    #[serde(default)]
    pub departed_names: BTreeSet<Username>,
}

impl SessionSnapshot {
    /// Snapshot of a freshly hosted session.
    pub fn hosted(host: Username, host_peer: PeerId) -> Self {
        Self {
            editor: host.clone(),
            users: BTreeSet::from([host.clone()]),
            peers: BTreeMap::from([(host_peer, host.clone())]),
            host,
            departed: BTreeSet::new(),
            departed_names: BTreeSet::new(),
        }
    }

    /// Check the structural invariants of a snapshot received from the wire.
    ///
    /// # Errors
    ///
    /// Returns `ProtoError::MalformedSnapshot` if the host or editor is not a
    /// user, an attributed peer maps to a non-user, or a departed peer is
    /// still attributed.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if !self.users.contains(&self.host) {
            return Err(ProtoError::MalformedSnapshot {
                reason: format!("host {} is not a user", self.host),
            });
        }

        if !self.users.contains(&self.editor) {
            return Err(ProtoError::MalformedSnapshot {
                reason: format!("editor {} is not a user", self.editor),
            });
        }

        if let Some((peer, name)) = self.peers.iter().find(|(_, name)| !self.users.contains(*name))
        {
            return Err(ProtoError::MalformedSnapshot {
                reason: format!("{peer} is attributed to unknown user {name}"),
            });
        }

        if let Some(peer) = self.departed.iter().find(|peer| self.peers.contains_key(*peer)) {
            return Err(ProtoError::MalformedSnapshot {
                reason: format!("{peer} is both attributed and departed"),
            });
        }

        Ok(())
    }
}

/// Why the host refused a join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The requested name is already in the session.
    NameTaken,
    /// The transport host is not running a session.
    NoSession,
}

/// Every message exchanged by coordinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMessage {
    /// Guest asks the host to be admitted under `username`.
    JoinRequest {
        /// Requested display name.
        username: Username,
    },

    /// Host admitted a peer. Carries the full state after the join.
    JoinAccepted {
        /// Admitted name.
        username: Username,
        /// Admitted peer.
        peer_id: PeerId,
        /// Session state including the new member.
        snapshot: SessionSnapshot,
    },

    /// Host refused a join. Sent only to the requesting peer.
    JoinRejected {
        /// Name that was requested.
        username: Username,
        /// Peer that requested it.
        peer_id: PeerId,
        /// Why it was refused.
        reason: RejectReason,
    },

    /// Write token moves. The only way the editor changes.
    Transfer {
        /// Editor as seen by the sender.
        from: Username,
        /// New editor.
        to: Username,
        /// Taken without the previous editor's consent.
        #[serde(default)]
        forced: bool,
    },

    /// A non-editor asks the editor to yield.
    AccessRequested {
        /// Requesting user.
        from: Username,
    },

    /// The editor declined an access request. Informational.
    AccessDeclined {
        /// Editor who declined.
        by: Username,
        /// User whose request was declined.
        requester: Username,
    },

    /// A member left, gracefully or as observed by the host.
    Left {
        /// Departing name.
        username: Username,
        /// Departing peer.
        peer_id: PeerId,
    },

    /// The host ended the session.
    Ended,
}

impl SessionMessage {
    /// Topic this message is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => Topic::JOIN,
            Self::JoinAccepted { .. } | Self::JoinRejected { .. } | Self::Left { .. } => {
                Topic::MEMBERSHIP
            },
            Self::Transfer { .. } => Topic::TOKEN,
            Self::AccessRequested { .. } | Self::AccessDeclined { .. } => Topic::ACCESS,
            Self::Ended => Topic::LIFECYCLE,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRequest { .. } => "join-request",
            Self::JoinAccepted { .. } => "join-accepted",
            Self::JoinRejected { .. } => "join-rejected",
            Self::Transfer { .. } => "transfer",
            Self::AccessRequested { .. } => "access-requested",
            Self::AccessDeclined { .. } => "access-declined",
            Self::Left { .. } => "left",
            Self::Ended => "ended",
        }
    }
}

/// A payload on a topic, as moved by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Destination topic (possibly a `relay:` request).
    pub topic: Topic,
    /// Encoded message.
    pub payload: Bytes,
}

impl WireFrame {
    /// Build a frame.
    pub fn new(topic: Topic, payload: Bytes) -> Self {
        Self { topic, payload }
    }
}

/// Transport-level unit written to a byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Host tells a newly connected guest its session-scoped identity.
    Assign {
        /// Identity assigned to the receiving guest.
        peer_id: PeerId,
    },
    /// Relay traffic.
    Frame(WireFrame),
}
