//! In-memory network with seeded fault injection.
//!
//! Each directed link is a FIFO queue, like a TCP stream. Faults are drawn
//! from a `ChaCha8Rng`, so a seed reproduces the exact same run:
//!
//! - **Loss**: a frame is discarded at send time
//! - **Duplication**: a frame is queued twice, back to back
//! - **Reordering**: the next link to deliver from is chosen at random, so
//!   frames from different senders interleave arbitrarily. Order within one
//!   link is never changed.
//!
//! Without reordering, frames are delivered in global send order.

use std::collections::{BTreeMap, VecDeque};

use penholder_proto::{PeerId, WireFrame};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Fault profile for a [`SimNetwork`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability that a frame is lost.
    pub drop_rate: f64,
    /// Probability that a frame is delivered twice.
    pub duplicate_rate: f64,
    /// Interleave links randomly instead of in send order.
    pub reorder: bool,
}

impl FaultConfig {
    /// Perfect network.
    pub const NONE: Self = Self { drop_rate: 0.0, duplicate_rate: 0.0, reorder: false };

    /// Lossless, but links interleave randomly.
    pub const REORDER: Self = Self { drop_rate: 0.0, duplicate_rate: 0.0, reorder: true };

    /// Loses `rate` of all frames.
    pub fn lossy(rate: f64) -> Self {
        Self { drop_rate: rate, ..Self::NONE }
    }

    /// Duplicates `rate` of all frames.
    pub fn duplicating(rate: f64) -> Self {
        Self { duplicate_rate: rate, ..Self::NONE }
    }
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::NONE
    }
}

/// Counters for what the network did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Frames handed to `send`.
    pub sent: u64,
    /// Frames lost.
    pub dropped: u64,
    /// Extra copies queued.
    pub duplicated: u64,
    /// Frames handed out by `next`.
    pub delivered: u64,
}

type LinkKey = (PeerId, PeerId);

/// Deterministic lossy network.
#[derive(Debug)]
pub struct SimNetwork {
    rng: ChaCha8Rng,
    faults: FaultConfig,
    links: BTreeMap<LinkKey, VecDeque<(u64, WireFrame)>>,
    next_seq: u64,
    stats: NetworkStats,
}

impl SimNetwork {
    /// Create a network with the given faults, seeded for reproducibility.
    pub fn new(faults: FaultConfig, seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            faults,
            links: BTreeMap::new(),
            next_seq: 0,
            stats: NetworkStats::default(),
        }
    }

    /// Queue `frame` on the link `from -> to`, subject to faults.
    pub fn send(&mut self, from: PeerId, to: PeerId, frame: WireFrame) {
        self.stats.sent += 1;

        if self.faults.drop_rate > 0.0 && self.rng.gen_bool(self.faults.drop_rate) {
            tracing::trace!(%from, %to, topic = %frame.topic, "dropped");
            self.stats.dropped += 1;
            return;
        }

        let copies = if self.faults.duplicate_rate > 0.0 && self.rng.gen_bool(self.faults.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };

        let queue = self.links.entry((from, to)).or_default();
        for _ in 0..copies {
            queue.push_back((self.next_seq, frame.clone()));
            self.next_seq += 1;
        }
    }

    /// Take the next frame to deliver, if any.
    pub fn next(&mut self) -> Option<(PeerId, PeerId, WireFrame)> {
        let key = if self.faults.reorder {
            let busy: Vec<LinkKey> =
                self.links.iter().filter(|(_, q)| !q.is_empty()).map(|(k, _)| *k).collect();
            if busy.is_empty() {
                return None;
            }
            busy[self.rng.gen_range(0..busy.len())]
        } else {
            self.links
                .iter()
                .filter_map(|(key, queue)| queue.front().map(|(seq, _)| (*seq, *key)))
                .min()
                .map(|(_, key)| key)?
        };

        let (_, frame) = self.links.get_mut(&key)?.pop_front()?;
        self.stats.delivered += 1;
        Some((key.0, key.1, frame))
    }

    /// Discard everything queued to or from `peer`.
    pub fn sever(&mut self, peer: PeerId) {
        self.links.retain(|(from, to), _| *from != peer && *to != peer);
    }

    /// Whether nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.links.values().all(VecDeque::is_empty)
    }

    /// Frames currently in flight.
    pub fn in_flight(&self) -> usize {
        self.links.values().map(VecDeque::len).sum()
    }

    /// What happened so far.
    pub fn stats(&self) -> NetworkStats {
        self.stats
    }
}
