//! Fuzz target for the [`Coordinator`] state machine
//!
//! Hostile peers must not be able to corrupt a replica.
//!
//! # Strategy
//!
//! - Local commands: host, join, give, request, answer, force, leave, end
//! - Inbound frames: well-formed session messages from arbitrary peers, on
//!   the right topic, a wrong topic, or wrapped as a relay request
//! - Garbage: random payload bytes on any topic
//! - Time: ticks past the join deadline, and transport disconnects
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - A replica always validates: host and editor are members, attributed
//!   names are members, departed peers are not attributed
//! - While active, the local user is a member
//! - The session host never changes within one session
//! - On the host, only a local `end`/`leave` closes the session

#![no_main]

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use penholder_core::{Coordinator, CoordinatorConfig, HostRelay, PromptOutcome};
use penholder_harness::ManualEnv;
use penholder_proto::{
    PeerId, RejectReason, SessionMessage, SessionSnapshot, Topic, Username, WireFrame, encode,
};

const NAMES: [&str; 4] = ["alice", "bob", "carol", "dave"];

#[derive(Debug, Clone, Copy, Arbitrary)]
struct Name(u8);

impl Name {
    fn get(self) -> Username {
        Username::new(NAMES[usize::from(self.0) % NAMES.len()]).expect("fixed names are valid")
    }
}

#[derive(Debug, Clone, Copy, Arbitrary)]
struct Peer(u8);

impl Peer {
    fn get(self) -> PeerId {
        PeerId::new(u64::from(self.0 % 4))
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum Command {
    Host(Name),
    Join(Name),
    Give(Name),
    Request,
    Answer { first: bool, outcome: u8 },
    Force,
    Leave,
    End,
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedMessage {
    JoinRequest(Name),
    JoinAccepted { username: Name, peer: Peer, host: Name, editor: Name, members: Vec<(Peer, Name)> },
    JoinRejected { username: Name, peer: Peer, taken: bool },
    Transfer { from: Name, to: Name, forced: bool },
    AccessRequested(Name),
    AccessDeclined { by: Name, requester: Name },
    Left { username: Name, peer: Peer },
    Ended,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Routing {
    Direct,
    RelayRequest,
    WrongTopic(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum Event {
    Command(Command),
    Receive { from: Peer, message: FuzzedMessage, routing: Routing },
    Garbage { from: Peer, topic: u8, bytes: Vec<u8> },
    Tick { advance_secs: u8 },
    Disconnect(Peer),
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    /// Local transport identity; 0 makes this peer the host.
    local: Peer,
    events: Vec<Event>,
}

fn message(fuzzed: FuzzedMessage) -> SessionMessage {
    match fuzzed {
        FuzzedMessage::JoinRequest(username) => SessionMessage::JoinRequest { username: username.get() },
        FuzzedMessage::JoinAccepted { username, peer, host, editor, members } => {
            let peers: BTreeMap<PeerId, Username> =
                members.into_iter().map(|(p, n)| (p.get(), n.get())).collect();
            let mut users: BTreeSet<Username> = peers.values().cloned().collect();
            users.insert(host.get());
            let snapshot = SessionSnapshot {
                host: host.get(),
                editor: editor.get(),
                users,
                peers,
                departed: BTreeSet::new(),
                departed_names: BTreeSet::new(),
            };
            SessionMessage::JoinAccepted { username: username.get(), peer_id: peer.get(), snapshot }
        },
        FuzzedMessage::JoinRejected { username, peer, taken } => SessionMessage::JoinRejected {
            username: username.get(),
            peer_id: peer.get(),
            reason: if taken { RejectReason::NameTaken } else { RejectReason::NoSession },
        },
        FuzzedMessage::Transfer { from, to, forced } => {
            SessionMessage::Transfer { from: from.get(), to: to.get(), forced }
        },
        FuzzedMessage::AccessRequested(from) => SessionMessage::AccessRequested { from: from.get() },
        FuzzedMessage::AccessDeclined { by, requester } => {
            SessionMessage::AccessDeclined { by: by.get(), requester: requester.get() }
        },
        FuzzedMessage::Left { username, peer } => {
            SessionMessage::Left { username: username.get(), peer_id: peer.get() }
        },
        FuzzedMessage::Ended => SessionMessage::Ended,
    }
}

fn topic(index: u8) -> Topic {
    Topic::new(Topic::ALL[usize::from(index) % Topic::ALL.len()])
}

fuzz_target!(|input: FuzzInput| {
    let env = ManualEnv::new();
    let local = input.local.get();
    let is_host = local == PeerId::HOST;

    let mut coordinator = Coordinator::new(env.clone(), CoordinatorConfig::default());
    coordinator.attach(HostRelay::new(local, PeerId::HOST));

    for event in input.events {
        let before = coordinator.snapshot().map(|s| s.host.clone());
        let mut local_close = false;

        match event {
            Event::Command(command) => {
                let _ = match command {
                    Command::Host(name) => coordinator.host_session(name.get().as_str()),
                    Command::Join(name) => coordinator.join_session(name.get().as_str()),
                    Command::Give(name) => coordinator.give_access(name.get().as_str()),
                    Command::Request => coordinator.request_access(),
                    Command::Answer { first, outcome } => {
                        let pending = coordinator.pending_requests();
                        let requester = if first { pending.first() } else { pending.last() };
                        let outcome = match outcome % 3 {
                            0 => PromptOutcome::Accept,
                            1 => PromptOutcome::Decline,
                            _ => PromptOutcome::Cancelled,
                        };
                        match requester.cloned() {
                            Some(requester) => coordinator.answer_access_request(&requester, outcome),
                            None => Ok(Vec::new()),
                        }
                    },
                    Command::Force => coordinator.force_take_access(),
                    Command::Leave => {
                        local_close = true;
                        coordinator.leave_session()
                    },
                    Command::End => {
                        local_close = true;
                        coordinator.end_session()
                    },
                };
            },
            Event::Receive { from, message: fuzzed, routing } => {
                let message = message(fuzzed);
                let Ok(payload) = encode(&message) else {
                    continue;
                };
                let topic = match routing {
                    Routing::Direct => Topic::new(message.topic()),
                    Routing::RelayRequest => Topic::new(message.topic()).relay_request(),
                    Routing::WrongTopic(index) => topic(index),
                };
                let _ = coordinator.receive(from.get(), WireFrame::new(topic, payload));
            },
            Event::Garbage { from, topic: index, bytes } => {
                let _ = coordinator.receive(from.get(), WireFrame::new(topic(index), Bytes::from(bytes)));
            },
            Event::Tick { advance_secs } => {
                env.advance(Duration::from_secs(u64::from(advance_secs)));
                let _ = coordinator.tick();
            },
            Event::Disconnect(peer) => {
                let _ = coordinator.peer_disconnected(peer.get());
            },
        }

        if let Some(snapshot) = coordinator.snapshot() {
            assert!(snapshot.validate().is_ok(), "invalid replica: {snapshot:?}");

            if let Some(me) = coordinator.local_user() {
                assert!(snapshot.users.contains(me), "local user {me} missing from {snapshot:?}");
            }

            if let Some(host) = &before {
                assert_eq!(&snapshot.host, host, "session host changed");
            }
        }

        if is_host && before.is_some() && !local_close {
            assert!(coordinator.snapshot().is_some(), "remote input closed the hosted session");
        }
    }
});
