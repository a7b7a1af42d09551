//! A whole session of coordinators on one simulated network.
//!
//! Peer `i` has transport identity `PeerId::new(i)`; peer 0 is the host.
//! Operations are applied to one coordinator and their frames go into the
//! [`SimNetwork`]. Nothing is delivered until the test calls
//! [`SimWorld::step`] or [`SimWorld::settle`], so tests control exactly how
//! far the network gets between operations.

use std::time::Duration;

use penholder_core::{
    Coordinator, CoordinatorAction, CoordinatorConfig, CoordinatorError, HostRelay, MeshRelay,
    Relay,
};
use penholder_proto::{PeerId, SessionSnapshot, Username};

use crate::{
    sim_env::ManualEnv,
    sim_network::{FaultConfig, SimNetwork},
};

/// Who a multicast reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Guests link to the host only.
    Star,
    /// Every peer links to every other peer.
    Mesh,
}

/// Coordinators wired together through a [`SimNetwork`].
pub struct SimWorld<R: Relay> {
    env: ManualEnv,
    topology: Topology,
    peers: Vec<Coordinator<ManualEnv, R>>,
    online: Vec<bool>,
    network: SimNetwork,
    events: Vec<Vec<CoordinatorAction>>,
}

impl SimWorld<HostRelay> {
    /// Host-relayed star of `size` peers.
    pub fn star(size: usize, faults: FaultConfig, seed: u64) -> Self {
        Self::build(size, Topology::Star, faults, seed, |local| HostRelay::new(local, PeerId::HOST))
    }
}

impl SimWorld<MeshRelay> {
    /// Full mesh of `size` peers.
    pub fn mesh(size: usize, faults: FaultConfig, seed: u64) -> Self {
        Self::build(size, Topology::Mesh, faults, seed, |local| MeshRelay::new(local, PeerId::HOST))
    }
}

impl<R: Relay> SimWorld<R> {
    fn build(
        size: usize,
        topology: Topology,
        faults: FaultConfig,
        seed: u64,
        relay: impl Fn(PeerId) -> R,
    ) -> Self {
        let env = ManualEnv::new();
        let peers = (0..size)
            .map(|i| {
                let mut peer = Coordinator::new(env.clone(), CoordinatorConfig::default());
                peer.attach(relay(peer_id(i)));
                peer
            })
            .collect();

        Self {
            env,
            topology,
            peers,
            online: vec![true; size],
            network: SimNetwork::new(faults, seed),
            events: vec![Vec::new(); size],
        }
    }

    /// Number of peers, online or not.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the world has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Coordinator of peer `i`.
    pub fn peer(&self, i: usize) -> &Coordinator<ManualEnv, R> {
        &self.peers[i]
    }

    /// Whether peer `i` is still connected.
    pub fn is_online(&self, i: usize) -> bool {
        self.online[i]
    }

    /// Peer `i`'s replica, if it is in a session.
    pub fn snapshot(&self, i: usize) -> Option<&SessionSnapshot> {
        self.peers[i].snapshot()
    }

    /// Current editor as seen by peer `i`.
    pub fn editor_of(&self, i: usize) -> Option<&Username> {
        self.snapshot(i).map(|s| &s.editor)
    }

    /// The shared clock.
    pub fn env(&self) -> &ManualEnv {
        &self.env
    }

    /// The network, for statistics.
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Run an operation on peer `i` and queue what it sends.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's refusal. Nothing is queued in that case.
    pub fn op(
        &mut self,
        i: usize,
        f: impl FnOnce(&mut Coordinator<ManualEnv, R>) -> Result<Vec<CoordinatorAction>, CoordinatorError>,
    ) -> Result<(), CoordinatorError> {
        let actions = f(&mut self.peers[i])?;
        self.absorb(i, actions);
        Ok(())
    }

    /// Deliver one frame. Returns false when nothing is in flight.
    pub fn step(&mut self) -> bool {
        let Some((from, to, frame)) = self.network.next() else {
            return false;
        };

        let index = peer_index(to);
        if index < self.peers.len() && self.online[index] {
            let actions = self.peers[index].receive(from, frame);
            self.absorb(index, actions);
        }
        true
    }

    /// Deliver until the network is quiet.
    pub fn settle(&mut self) {
        while self.step() {}
    }

    /// Move the clock and tick every online peer.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        for i in 0..self.peers.len() {
            if self.online[i] {
                let actions = self.peers[i].tick();
                self.absorb(i, actions);
            }
        }
    }

    /// Cut peer `i` off without a graceful leave.
    ///
    /// Its queued traffic is lost and every peer it was linked to learns of
    /// the disconnect.
    pub fn disconnect(&mut self, i: usize) {
        if !self.online[i] {
            return;
        }
        self.online[i] = false;
        self.network.sever(peer_id(i));

        let (_, actions) = self.peers[i].detach();
        self.events[i].extend(actions);

        for other in self.neighbours(i) {
            let actions = self.peers[other].peer_disconnected(peer_id(i));
            self.absorb(other, actions);
        }
    }

    /// Take the user-facing actions peer `i` produced so far.
    pub fn take_events(&mut self, i: usize) -> Vec<CoordinatorAction> {
        std::mem::take(&mut self.events[i])
    }

    /// Check `editor ∈ users` and `host ∈ users` on every replica, and that
    /// each replica's attribution map only names members.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (i, peer) in self.peers.iter().enumerate() {
            let Some(snapshot) = peer.snapshot() else {
                continue;
            };
            if !snapshot.users.contains(&snapshot.editor) {
                return Err(format!("peer {i}: editor {} is not a user", snapshot.editor));
            }
            if !snapshot.users.contains(&snapshot.host) {
                return Err(format!("peer {i}: host {} is not a user", snapshot.host));
            }
            if let Some(name) = snapshot.peers.values().find(|name| !snapshot.users.contains(*name)) {
                return Err(format!("peer {i}: attributed name {name} is not a user"));
            }
        }
        Ok(())
    }

    /// Whether every peer in a session holds the same replica.
    pub fn converged(&self) -> bool {
        let mut replicas = self.peers.iter().filter_map(|p| p.snapshot()).map(|s| (&s.editor, &s.users));
        replicas.next().is_none_or(|first| replicas.all(|other| other == first))
    }

    fn neighbours(&self, i: usize) -> Vec<usize> {
        let online = |j: &usize| *j != i && self.online[*j];
        match self.topology {
            Topology::Star if i == 0 => (1..self.peers.len()).filter(online).collect(),
            Topology::Star => [0].into_iter().filter(online).collect(),
            Topology::Mesh => (0..self.peers.len()).filter(online).collect(),
        }
    }

    fn absorb(&mut self, from: usize, actions: Vec<CoordinatorAction>) {
        let sender = peer_id(from);
        for action in actions {
            match action {
                CoordinatorAction::Multicast(frame) => {
                    for to in self.neighbours(from) {
                        self.network.send(sender, peer_id(to), frame.clone());
                    }
                },
                CoordinatorAction::Unicast { to, frame } => {
                    self.network.send(sender, to, frame);
                },
                other => self.events[from].push(other),
            }
        }
    }
}

fn peer_id(index: usize) -> PeerId {
    PeerId::new(index as u64)
}

fn peer_index(peer: PeerId) -> usize {
    usize::try_from(peer.get()).unwrap_or(usize::MAX)
}
