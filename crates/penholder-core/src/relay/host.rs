//! Host-relayed broadcast over an asymmetric transport.

use bytes::Bytes;
use penholder_proto::{PeerId, Topic, WireFrame};

use super::{Relay, RelayAction, Role, Topics};
use crate::error::RelayError;

/// Relay for transports where only the host can multicast.
///
/// On the host, `send` multicasts and delivers locally. On a guest, `send`
/// becomes a unicast of `relay:<topic>` to the host, and the guest observes
/// its own broadcast only when the host echoes it back. Guests therefore see
/// exactly the host's order of events.
#[derive(Debug)]
pub struct HostRelay {
    local: PeerId,
    host: PeerId,
    topics: Topics,
}

impl HostRelay {
    /// Create a relay for `local` in a session hosted by `host`.
    pub fn new(local: PeerId, host: PeerId) -> Self {
        Self { local, host, topics: Topics::default() }
    }

    fn is_host(&self) -> bool {
        self.local == self.host
    }

    /// Host side of an inbound guest frame.
    fn receive_as_host(
        &self,
        from: PeerId,
        frame: WireFrame,
    ) -> Result<Vec<RelayAction>, RelayError> {
        if !frame.topic.is_relay_request() {
            // Host-addressed traffic (join requests): local delivery only.
            if self.topics.is_host_only(&frame.topic) {
                return Err(RelayError::Unauthorized { topic: frame.topic, origin: from });
            }
            return Ok(self.topics.deliver(from, frame.topic, frame.payload).into_iter().collect());
        }

        let inner = frame
            .topic
            .strip_relay()
            .filter(|inner| !inner.is_relay_request())
            .ok_or_else(|| RelayError::InvalidRelayTopic { topic: frame.topic.clone(), origin: from })?;

        if self.topics.is_host_only(&inner) {
            return Err(RelayError::Unauthorized { topic: inner, origin: from });
        }

        tracing::trace!(topic = %inner, %from, "re-publishing relay request");

        let mut actions = vec![RelayAction::Multicast(WireFrame::new(inner.clone(), frame.payload.clone()))];
        actions.extend(self.topics.deliver(from, inner, frame.payload));
        Ok(actions)
    }

    /// Guest side of an inbound frame.
    fn receive_as_guest(
        &self,
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

impl Relay for HostRelay {
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
        match self.role() {
            Role::Host => {
                let mut actions =
                    vec![RelayAction::Multicast(WireFrame::new(topic.clone(), payload.clone()))];
                actions.extend(self.topics.deliver(self.local, topic, payload));
                actions
            },
            Role::Guest => {
                vec![RelayAction::Unicast {
                    to: self.host,
                    frame: WireFrame::new(topic.relay_request(), payload),
                }]
            },
        }
    }

    fn send_to_host(&mut self, topic: Topic, payload: Bytes) -> Vec<RelayAction> {
        if self.is_host() {
            return self.topics.deliver(self.local, topic, payload).into_iter().collect();
        }
        vec![RelayAction::Unicast { to: self.host, frame: WireFrame::new(topic, payload) }]
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
        if self.is_host() { self.receive_as_host(from, frame) } else { self.receive_as_guest(from, frame) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUEST: PeerId = PeerId::new(3);

    fn subscribed(local: PeerId) -> HostRelay {
        let mut relay = HostRelay::new(local, PeerId::HOST);
        for topic in Topic::ALL {
            relay.subscribe(Topic::new(topic));
        }
        relay.restrict_to_host(Topic::new(Topic::LIFECYCLE));
        relay
    }

    fn payload() -> Bytes {
        Bytes::from_static(b"event")
    }

    #[test]
    fn host_send_multicasts_and_delivers_locally() {
        let mut relay = subscribed(PeerId::HOST);
        let actions = relay.send(Topic::new(Topic::TOKEN), payload());

        assert_eq!(actions, vec![
            RelayAction::Multicast(WireFrame::new(Topic::new(Topic::TOKEN), payload())),
            RelayAction::Deliver {
                origin: PeerId::HOST,
                topic: Topic::new(Topic::TOKEN),
                payload: payload(),
            },
        ]);
    }

    #[test]
    fn guest_send_becomes_relay_request() {
        let mut relay = subscribed(GUEST);
        let actions = relay.send(Topic::new(Topic::TOKEN), payload());

        assert_eq!(actions, vec![RelayAction::Unicast {
            to: PeerId::HOST,
            frame: WireFrame::new(Topic::new(Topic::TOKEN).relay_request(), payload()),
        }]);
    }

    #[test]
    fn host_republishes_relay_request() {
        let mut relay = subscribed(PeerId::HOST);
        let frame = WireFrame::new(Topic::new(Topic::ACCESS).relay_request(), payload());

        let actions = relay.receive(GUEST, frame).expect("accepted");

        assert_eq!(actions, vec![
            RelayAction::Multicast(WireFrame::new(Topic::new(Topic::ACCESS), payload())),
            RelayAction::Deliver { origin: GUEST, topic: Topic::new(Topic::ACCESS), payload: payload() },
        ]);
    }

    #[test]
    fn host_delivers_join_request_without_republishing() {
        let mut relay = subscribed(PeerId::HOST);
        let frame = WireFrame::new(Topic::new(Topic::JOIN), payload());

        let actions = relay.receive(GUEST, frame).expect("accepted");
        assert!(matches!(actions.as_slice(), [RelayAction::Deliver { .. }]));
    }

    #[test]
    fn host_refuses_relaying_restricted_topic() {
        let mut relay = subscribed(PeerId::HOST);
        let frame = WireFrame::new(Topic::new(Topic::LIFECYCLE).relay_request(), payload());

        let err = relay.receive(GUEST, frame).expect_err("restricted");
        assert!(matches!(err, RelayError::Unauthorized { .. }));
    }

    #[test]
    fn nested_relay_request_is_invalid() {
        let mut relay = subscribed(PeerId::HOST);
        let nested = Topic::new(Topic::TOKEN).relay_request().relay_request();

        let err = relay.receive(GUEST, WireFrame::new(nested, payload())).expect_err("invalid");
        assert!(matches!(err, RelayError::InvalidRelayTopic { .. }));
    }

    #[test]
    fn guest_rejects_relay_requests() {
        let mut relay = subscribed(GUEST);
        let frame = WireFrame::new(Topic::new(Topic::TOKEN).relay_request(), payload());

        let err = relay.receive(PeerId::HOST, frame).expect_err("not a relay point");
        assert!(matches!(err, RelayError::NotRelayPoint { .. }));
    }

    #[test]
    fn guest_delivers_host_broadcast() {
        let mut relay = subscribed(GUEST);
        let frame = WireFrame::new(Topic::new(Topic::LIFECYCLE), payload());

        let actions = relay.receive(PeerId::HOST, frame).expect("accepted");
        assert_eq!(actions.len(), 1);
    }
}
