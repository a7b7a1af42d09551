//! Topic-based broadcast relay.
//!
//! A relay turns "publish this payload on a topic" into concrete transport
//! work. It performs no I/O: every call returns [`RelayAction`]s that the
//! caller executes (multicast or unicast a frame) or feeds back into the
//! coordinator (deliver locally).
//!
//! Two strategies share this interface:
//!
//! - [`HostRelay`]: only the host can multicast. Guests wrap their broadcasts
//!   in a `relay:` request addressed to the host, which re-publishes them.
//!   Every replica therefore observes the host's order.
//! - [`MeshRelay`]: every peer multicasts directly. Ordering is per-sender
//!   FIFO only.
//!
//! Callers never depend on which strategy is in use.

mod host;
mod mesh;

use std::collections::HashSet;

use bytes::Bytes;
pub use host::HostRelay;
pub use mesh::MeshRelay;
use penholder_proto::{PeerId, Topic, WireFrame};

use crate::error::RelayError;

/// Which side of the asymmetric transport this peer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Session creator; the only peer able to multicast under [`HostRelay`].
    Host,
    /// Any other participant.
    Guest,
}

/// Work produced by a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send the frame to every other connected peer.
    Multicast(WireFrame),

    /// Send the frame to one peer.
    Unicast {
        /// Destination peer.
        to: PeerId,
        /// Frame to send.
        frame: WireFrame,
    },

    /// Hand a payload to the local subscriber of `topic`.
    Deliver {
        /// Peer the payload came from (the local peer for own broadcasts).
        origin: PeerId,
        /// Topic the payload was published on.
        topic: Topic,
        /// Encoded message.
        payload: Bytes,
    },
}

/// Broadcast relay over an asymmetric or symmetric transport.
pub trait Relay {
    /// Transport identity of this peer.
    fn local_peer(&self) -> PeerId;

    /// Transport identity of the session host.
    fn host_peer(&self) -> PeerId;

    /// Role derived from the transport link.
    fn role(&self) -> Role {
        if self.local_peer() == self.host_peer() { Role::Host } else { Role::Guest }
    }

    /// Deliver frames on `topic` locally from now on.
    fn subscribe(&mut self, topic: Topic);

    /// Accept frames on `topic` only when they originate at the host.
    fn restrict_to_host(&mut self, topic: Topic);

    /// Broadcast to every participant, including the local subscriber.
    fn send(&mut self, topic: Topic, payload: Bytes) -> Vec<RelayAction>;

    /// Address the host only. The host does not re-publish these.
    fn send_to_host(&mut self, topic: Topic, payload: Bytes) -> Vec<RelayAction>;

    /// Address one peer only.
    fn reply(&mut self, to: PeerId, topic: Topic, payload: Bytes) -> Vec<RelayAction>;

    /// Process a frame received from `from`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError` if the frame is not acceptable on this peer. The
    /// frame is dropped; the error is never fatal.
    fn receive(&mut self, from: PeerId, frame: WireFrame)
    -> Result<Vec<RelayAction>, RelayError>;
}

/// Topic bookkeeping shared by both strategies.
#[derive(Debug, Default)]
struct Topics {
    subscribed: HashSet<Topic>,
    host_only: HashSet<Topic>,
}

impl Topics {
    fn subscribe(&mut self, topic: Topic) {
        self.subscribed.insert(topic);
    }

    fn restrict(&mut self, topic: Topic) {
        self.host_only.insert(topic);
    }

    fn is_host_only(&self, topic: &Topic) -> bool {
        self.host_only.contains(topic)
    }

    /// Local delivery, if anyone listens.
    fn deliver(&self, origin: PeerId, topic: Topic, payload: Bytes) -> Option<RelayAction> {
        if self.subscribed.contains(&topic) {
            Some(RelayAction::Deliver { origin, topic, payload })
        } else {
            tracing::trace!(%topic, %origin, "no subscriber, dropping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribed_topic_is_not_delivered() {
        let topics = Topics::default();
        let delivered = topics.deliver(PeerId::HOST, Topic::from("penholder.token"), Bytes::new());
        assert!(delivered.is_none());
    }

    #[test]
    fn role_follows_host_identity() {
        let host = HostRelay::new(PeerId::HOST, PeerId::HOST);
        let guest = HostRelay::new(PeerId::new(4), PeerId::HOST);

        assert_eq!(host.role(), Role::Host);
        assert_eq!(guest.role(), Role::Guest);
    }
}
