//! Coordinator handshake and token flow over a host-relayed star.
//!
//! Frames are routed by hand through a FIFO queue, so every test sees a
//! single deterministic delivery order. The mesh tests at the end deliver
//! individual frames in an order chosen to put a transfer ahead of the
//! join it depends on.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use penholder_core::{
    CloseReason, Coordinator, CoordinatorAction, CoordinatorConfig, CoordinatorError, Environment,
    HostRelay, MeshRelay, PromptOutcome,
};
use penholder_proto::{PeerId, Username, WireFrame};

#[derive(Clone)]
struct FixedEnv(Arc<Mutex<Instant>>);

impl Environment for FixedEnv {
    fn now(&self) -> Instant {
        *self.0.lock().expect("clock lock")
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        *self.0.lock().expect("clock lock") += duration;
        std::future::ready(())
    }
}

type Peer = Coordinator<FixedEnv, HostRelay>;

/// Star network: peer 0 is the host, every other peer links to it only.
struct Star {
    peers: Vec<Peer>,
    in_flight: VecDeque<(PeerId, PeerId, WireFrame)>,
    events: Vec<Vec<CoordinatorAction>>,
}

impl Star {
    fn new(size: usize) -> Self {
        let env = FixedEnv(Arc::new(Mutex::new(Instant::now())));
        let peers = (0..size)
            .map(|i| {
                let mut peer = Coordinator::new(env.clone(), CoordinatorConfig::default());
                peer.attach(HostRelay::new(PeerId::new(i as u64), PeerId::HOST));
                peer
            })
            .collect();
        Self { peers, in_flight: VecDeque::new(), events: vec![Vec::new(); size] }
    }

    fn absorb(&mut self, from: usize, actions: Vec<CoordinatorAction>) {
        let sender = PeerId::new(from as u64);
        for action in actions {
            match action {
                CoordinatorAction::Multicast(frame) => {
                    let targets: Vec<usize> = if from == 0 { (1..self.peers.len()).collect() } else { vec![0] };
                    for to in targets {
                        self.in_flight.push_back((sender, PeerId::new(to as u64), frame.clone()));
                    }
                },
                CoordinatorAction::Unicast { to, frame } => {
                    self.in_flight.push_back((sender, to, frame));
                },
                other => self.events[from].push(other),
            }
        }
    }

    fn op(
        &mut self,
        peer: usize,
        f: impl FnOnce(&mut Peer) -> Result<Vec<CoordinatorAction>, CoordinatorError>,
    ) -> Result<(), CoordinatorError> {
        let actions = f(&mut self.peers[peer])?;
        self.absorb(peer, actions);
        self.settle();
        Ok(())
    }

    fn settle(&mut self) {
        while let Some((from, to, frame)) = self.in_flight.pop_front() {
            let index = to.get() as usize;
            let actions = self.peers[index].receive(from, frame);
            self.absorb(index, actions);
        }
    }

    fn editor_of(&self, peer: usize) -> Option<Username> {
        self.peers[peer].snapshot().map(|s| s.editor.clone())
    }

    fn take_events(&mut self, peer: usize) -> Vec<CoordinatorAction> {
        std::mem::take(&mut self.events[peer])
    }
}

fn name(raw: &str) -> Username {
    Username::new(raw).expect("valid username")
}

fn session(size: usize, names: &[&str]) -> Star {
    let mut star = Star::new(size);
    star.op(0, |p| p.host_session(names[0])).expect("host");
    for (i, username) in names.iter().enumerate().skip(1) {
        star.op(i, |p| p.join_session(username)).expect("join");
    }
    star
}

#[test]
fn joiner_receives_full_snapshot() {
    let mut star = session(3, &["alice", "bob", "carol"]);

    let carol = star.peers[2].snapshot().expect("carol joined");
    assert_eq!(carol.users.len(), 3);
    assert_eq!(carol.editor, name("alice"));
    assert_eq!(star.peers[1].snapshot(), star.peers[2].snapshot());
    assert_eq!(star.peers[0].snapshot(), star.peers[2].snapshot());

    let bob_events = star.take_events(1);
    assert!(bob_events.contains(&CoordinatorAction::MemberJoined { username: name("carol") }));
}

#[test]
fn give_access_reaches_every_replica() {
    let mut star = session(3, &["alice", "bob", "carol"]);

    star.op(0, |p| p.give_access("bob")).expect("give");

    for peer in 0..3 {
        assert_eq!(star.editor_of(peer), Some(name("bob")));
    }
    assert!(star.peers[1].is_editor());
}

#[test]
fn non_editor_give_is_refused_without_change() {
    let mut star = session(2, &["alice", "bob"]);
    let before = star.peers[1].snapshot().cloned();

    let result = star.op(1, |p| p.give_access("alice"));

    assert_eq!(result, Err(CoordinatorError::NotEditor));
    assert_eq!(star.peers[1].snapshot().cloned(), before);
}

#[test]
fn duplicate_name_is_rejected() {
    let mut star = session(3, &["alice", "bob"]);
    let host_before = star.peers[0].snapshot().cloned();

    star.op(2, |p| p.join_session("bob")).expect("request sent");

    assert!(star.peers[2].is_idle());
    assert_eq!(
        star.take_events(2),
        vec![CoordinatorAction::JoinFailed(CoordinatorError::NameTaken { username: name("bob") })]
    );
    assert_eq!(star.peers[0].snapshot().cloned(), host_before);
}

#[test]
fn join_without_hosted_session_fails() {
    let mut star = Star::new(2);

    star.op(1, |p| p.join_session("bob")).expect("request sent");

    assert!(star.peers[1].is_idle());
    assert_eq!(
        star.take_events(1),
        vec![CoordinatorAction::JoinFailed(CoordinatorError::NoSessionFound)]
    );
}

#[test]
fn access_request_prompts_editor_and_accept_transfers() {
    let mut star = session(3, &["alice", "bob", "carol"]);

    star.op(1, |p| p.request_access()).expect("request");

    let alice_events = star.take_events(0);
    assert!(alice_events.contains(&CoordinatorAction::PromptAccessRequest { requester: name("bob") }));
    assert_eq!(star.peers[0].pending_requests(), vec![name("bob")]);

    star.op(0, |p| p.answer_access_request(&name("bob"), PromptOutcome::Accept)).expect("accept");

    assert_eq!(star.editor_of(2), Some(name("bob")));
    assert!(star.peers[0].pending_requests().is_empty());
}

#[test]
fn declined_request_notifies_requester_only() {
    let mut star = session(2, &["alice", "bob"]);
    star.op(1, |p| p.request_access()).expect("request");
    star.take_events(1);

    star.op(0, |p| p.answer_access_request(&name("bob"), PromptOutcome::Decline)).expect("decline");

    assert_eq!(star.editor_of(1), Some(name("alice")));
    assert!(star.take_events(1).iter().any(|a| matches!(a, CoordinatorAction::Notice { .. })));
}

#[test]
fn force_take_overrides_editor() {
    let mut star = session(3, &["alice", "bob", "carol"]);
    star.op(0, |p| p.give_access("bob")).expect("give");
    star.take_events(1);

    star.op(2, |p| p.force_take_access()).expect("force");

    for peer in 0..3 {
        assert_eq!(star.editor_of(peer), Some(name("carol")));
    }
    assert!(star.take_events(1).contains(&CoordinatorAction::EditorChanged {
        from: name("bob"),
        to: name("carol"),
        forced: true,
    }));
}

#[test]
fn editor_leaving_returns_token_to_host() {
    let mut star = session(3, &["alice", "bob", "carol"]);
    star.op(0, |p| p.give_access("bob")).expect("give");

    star.op(1, |p| p.leave_session()).expect("leave");

    assert!(star.peers[1].is_idle());
    for peer in [0, 2] {
        let snapshot = star.peers[peer].snapshot().expect("still in session");
        assert_eq!(snapshot.editor, name("alice"));
        assert!(!snapshot.users.contains(&name("bob")));
    }
}

#[test]
fn vanished_guest_is_removed_by_host() {
    let mut star = session(3, &["alice", "bob", "carol"]);

    let actions = star.peers[0].peer_disconnected(PeerId::new(2));
    star.absorb(0, actions);
    star.settle();

    assert!(!star.peers[1].snapshot().expect("bob in session").users.contains(&name("carol")));
}

#[test]
fn guest_losing_host_closes_session() {
    let mut star = session(2, &["alice", "bob"]);

    let actions = star.peers[1].peer_disconnected(PeerId::HOST);

    assert_eq!(actions, vec![CoordinatorAction::SessionClosed { reason: CloseReason::HostLost }]);
    assert!(star.peers[1].is_idle());
}

#[test]
fn end_session_closes_every_peer() {
    let mut star = session(3, &["alice", "bob", "carol"]);

    assert_eq!(star.op(1, |p| p.end_session()), Err(CoordinatorError::NotHost));
    star.op(0, |p| p.end_session()).expect("end");

    for peer in 0..3 {
        assert!(star.peers[peer].is_idle());
    }
    assert!(star.take_events(2).contains(&CoordinatorAction::SessionClosed { reason: CloseReason::Ended }));
}

type MeshPeer = Coordinator<FixedEnv, MeshRelay>;

/// Alice hosting (peer 0) with carol (peer 2) joined; bob (peer 1) idle.
fn mesh_trio() -> Vec<MeshPeer> {
    let env = FixedEnv(Arc::new(Mutex::new(Instant::now())));
    let mut peers: Vec<MeshPeer> = (0..3u64)
        .map(|i| {
            let mut peer = Coordinator::new(env.clone(), CoordinatorConfig::default());
            peer.attach(MeshRelay::new(PeerId::new(i), PeerId::HOST));
            peer
        })
        .collect();

    peers[0].host_session("alice").expect("host");
    let request = frames(peers[2].join_session("carol").expect("join"));
    let accepted = deliver(&mut peers[0], 2, request);
    deliver(&mut peers[2], 0, accepted);
    peers
}

fn frames(actions: Vec<CoordinatorAction>) -> Vec<WireFrame> {
    actions
        .into_iter()
        .filter_map(|action| match action {
            CoordinatorAction::Multicast(frame) | CoordinatorAction::Unicast { frame, .. } => Some(frame),
            _ => None,
        })
        .collect()
}

/// Feed frames from `from` to `peer`, returning what it sends in response.
fn deliver(peer: &mut MeshPeer, from: u64, frames_in: Vec<WireFrame>) -> Vec<WireFrame> {
    frames_in.into_iter().flat_map(|frame| frames(peer.receive(PeerId::new(from), frame))).collect()
}

#[test]
fn mesh_force_before_join_lands_on_joiner() {
    let mut peers = mesh_trio();

    let request = frames(peers[1].join_session("bob").expect("join"));
    let accepted = deliver(&mut peers[0], 1, request);
    deliver(&mut peers[1], 0, accepted.clone());

    let force = frames(peers[1].force_take_access().expect("force"));
    deliver(&mut peers[0], 1, force.clone());

    // Carol hears the force before learning bob exists.
    deliver(&mut peers[2], 1, force);
    assert_eq!(peers[2].snapshot().map(|s| s.editor.clone()), Some(name("alice")));
    deliver(&mut peers[2], 0, accepted);

    for peer in &peers {
        assert_eq!(peer.snapshot().map(|s| s.editor.clone()), Some(name("bob")));
    }
}

#[test]
fn mesh_joiner_replays_transfer_that_beat_its_acceptance() {
    let mut peers = mesh_trio();
    let give = frames(peers[0].give_access("carol").expect("give"));
    deliver(&mut peers[2], 0, give);

    let request = frames(peers[1].join_session("bob").expect("join"));
    let accepted = deliver(&mut peers[0], 1, request);
    deliver(&mut peers[2], 0, accepted.clone());

    let give = frames(peers[2].give_access("bob").expect("give"));
    deliver(&mut peers[0], 2, give.clone());

    // Bob is still joining when carol's handover reaches him.
    deliver(&mut peers[1], 2, give);
    assert!(peers[1].is_joining());
    deliver(&mut peers[1], 0, accepted);

    for peer in &peers {
        assert_eq!(peer.snapshot().map(|s| s.editor.clone()), Some(name("bob")));
    }
    assert!(peers[1].is_editor());
}
