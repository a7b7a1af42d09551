//! Full-mesh broadcast.

use bytes::Bytes;
use penholder_proto::{PeerId, Topic, WireFrame};

use super::{Relay, RelayAction, Topics};
use crate::error::RelayError;

/// Relay for transports where every peer can multicast.
///
/// Frames carry no relay indirection. Ordering is per-sender FIFO only, so two
/// replicas can observe concurrent events from different senders in different
/// orders.
#[derive(Debug)]
pub struct MeshRelay {
    local: PeerId,
    host: PeerId,
    topics: Topics,
}

impl MeshRelay {
    /// Create a relay for `local` in a session hosted by `host`.
    pub fn new(local: PeerId, host: PeerId) -> Self {
        Self { local, host, topics: Topics::default() }
    }
}

impl Relay for MeshRelay {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn host_peer(&self) -> PeerId {
        self.host
    }

    fn subscribe(&mut self, topic: Topic) {
        self.topics.subscribe(topic);
    }

    fn restrict_to_host(&mut self, topic: Topic) {
        self.topics.restrict(topic);
    }

    fn send(&mut self, topic: Topic, payload: Bytes) -> Vec<RelayAction> {
        let mut actions = vec![RelayAction::Multicast(WireFrame::new(topic.clone(), payload.clone()))];
        actions.extend(self.topics.deliver(self.local, topic, payload));
        actions
    }

    fn send_to_host(&mut self, topic: Topic, payload: Bytes) -> Vec<RelayAction> {
        self.reply(self.host, topic, payload)
    }

    fn reply(&mut self, to: PeerId, topic: Topic, payload: Bytes) -> Vec<RelayAction> {
        if to == self.local {
            return self.topics.deliver(self.local, topic, payload).into_iter().collect();
        }
        vec![RelayAction::Unicast { to, frame: WireFrame::new(topic, payload) }]
    }

    fn receive(
        &mut self,
        from: PeerId,
        frame: WireFrame,
    ) -> Result<Vec<RelayAction>, RelayError> {
        if frame.topic.is_relay_request() {
            return Err(RelayError::NotRelayPoint { topic: frame.topic, origin: from });
        }

        if from != self.host && self.topics.is_host_only(&frame.topic) {
            return Err(RelayError::Unauthorized { topic: frame.topic, origin: from });
        }

        Ok(self.topics.deliver(from, frame.topic, frame.payload).into_iter().collect())
    }
}
