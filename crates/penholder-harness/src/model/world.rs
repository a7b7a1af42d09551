//! Model world: the reference session.
//!
//! One authoritative session value and a phase per peer. Operations take
//! effect everywhere at once, which is what the real system looks like after
//! the network settles on a reliable FIFO transport.

use std::collections::BTreeSet;

use super::operation::{NameChoice, Operation, OperationError, OperationResult};

/// Name the host always uses.
pub const HOST_NAME: &str = "alice";

/// What one peer shows, for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerView {
    /// Not in a session.
    Idle,
    /// Waiting for the host.
    Joining,
    /// In a session.
    Active {
        /// Local display name.
        me: String,
        /// Current editor.
        editor: String,
        /// Members, sorted.
        users: Vec<String>,
        /// Unanswered access requests, sorted.
        pending: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining,
    Active(&'static str),
}

#[derive(Debug, Clone)]
struct Session {
    editor: &'static str,
    users: BTreeSet<&'static str>,
    departed: BTreeSet<usize>,
}

/// Reference implementation of a session across `size` peers.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    phases: Vec<Phase>,
    prompts: Vec<BTreeSet<&'static str>>,
    session: Option<Session>,
}

impl ModelWorld {
    /// Create a world of idle peers. Peer 0 is the transport host.
    pub fn new(size: usize) -> Self {
        Self { phases: vec![Phase::Idle; size], prompts: vec![BTreeSet::new(); size], session: None }
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Whether the world has no peers.
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Current editor, if a session is running.
    pub fn editor(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.editor)
    }

    /// Current members, if a session is running.
    pub fn users(&self) -> Option<Vec<&str>> {
        self.session.as_ref().map(|s| s.users.iter().copied().collect())
    }

    /// Apply an operation and return the result.
    ///
    /// `op` must already be clamped to this world's size.
    pub fn apply(&mut self, op: &Operation) -> OperationResult {
        let result = match *op {
            Operation::Host { peer } => self.host(usize::from(peer)),
            Operation::Join { peer, name } => self.join(usize::from(peer), name),
            Operation::Give { peer, target } => self.give(usize::from(peer), target.name()),
            Operation::Request { peer } => self.request(usize::from(peer)),
            Operation::Accept { peer } => self.answer(usize::from(peer), true),
            Operation::Decline { peer } => self.answer(usize::from(peer), false),
            Operation::Force { peer } => self.force(usize::from(peer)),
            Operation::Leave { peer } => self.leave(usize::from(peer)),
            Operation::End { peer } => self.end(usize::from(peer)),
            Operation::ExpireJoins => {
                for phase in &mut self.phases {
                    if *phase == Phase::Joining {
                        *phase = Phase::Idle;
                    }
                }
                Ok(())
            },
        };

        match result {
            Ok(()) => OperationResult::Ok,
            Err(error) => OperationResult::Error(error),
        }
    }

    /// What every peer shows.
    pub fn observable_state(&self) -> Vec<PeerView> {
        self.phases
            .iter()
            .zip(&self.prompts)
            .map(|(phase, prompts)| match (phase, &self.session) {
                (Phase::Idle, _) => PeerView::Idle,
                (Phase::Joining, _) => PeerView::Joining,
                (Phase::Active(me), Some(session)) => PeerView::Active {
                    me: (*me).to_string(),
                    editor: session.editor.to_string(),
                    users: session.users.iter().map(|u| (*u).to_string()).collect(),
                    pending: prompts.iter().map(|u| (*u).to_string()).collect(),
                },
                (Phase::Active(_), None) => PeerView::Idle,
            })
            .collect()
    }

    fn active(&self, peer: usize) -> Result<&'static str, OperationError> {
        match self.phases[peer] {
            Phase::Active(me) => Ok(me),
            Phase::Idle | Phase::Joining => Err(OperationError::NotInSession),
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session, OperationError> {
        self.session.as_mut().ok_or(OperationError::NotInSession)
    }

    fn go_idle(&mut self, peer: usize) {
        self.phases[peer] = Phase::Idle;
        self.prompts[peer].clear();
    }

    fn host(&mut self, peer: usize) -> Result<(), OperationError> {
        if self.phases[peer] != Phase::Idle {
            return Err(OperationError::AlreadyInSession);
        }
        if peer != 0 {
            return Err(OperationError::TransportUnavailable);
        }

        self.session = Some(Session {
            editor: HOST_NAME,
            users: BTreeSet::from([HOST_NAME]),
            departed: BTreeSet::new(),
        });
        self.phases[0] = Phase::Active(HOST_NAME);
        Ok(())
    }

    fn join(&mut self, peer: usize, name: NameChoice) -> Result<(), OperationError> {
        if self.phases[peer] != Phase::Idle {
            return Err(OperationError::AlreadyInSession);
        }
        if peer == 0 {
            return Err(OperationError::NoSessionFound);
        }

        let name = name.name();
        let outcome = match &mut self.session {
            // Rejected: no session.
            None => Phase::Idle,
            // Host ignores departed peers; the join hangs until it expires.
            Some(session) if session.departed.contains(&peer) => Phase::Joining,
            // Rejected: name taken.
            Some(session) if session.users.contains(name) => Phase::Idle,
            Some(session) => {
                session.users.insert(name);
                Phase::Active(name)
            },
        };
        self.phases[peer] = outcome;
        Ok(())
    }

    fn give(&mut self, peer: usize, target: &'static str) -> Result<(), OperationError> {
        let me = self.active(peer)?;
        let session = self.session_mut()?;
        if session.editor != me {
            return Err(OperationError::NotEditor);
        }
        if target == me || !session.users.contains(target) {
            return Err(OperationError::InvalidTarget);
        }

        session.editor = target;
        self.clear_prompts();
        Ok(())
    }

    fn request(&mut self, peer: usize) -> Result<(), OperationError> {
        let me = self.active(peer)?;
        let editor = self.session_mut()?.editor;
        if editor == me {
            return Err(OperationError::AlreadyEditor);
        }

        if let Some(holder) = self.phases.iter().position(|p| *p == Phase::Active(editor)) {
            self.prompts[holder].insert(me);
        }
        Ok(())
    }

    fn answer(&mut self, peer: usize, accept: bool) -> Result<(), OperationError> {
        let Some(first) = self.prompts[peer].first().copied() else {
            return Err(OperationError::NoPendingRequest);
        };

        if accept {
            self.give(peer, first)
        } else {
            self.prompts[peer].remove(first);
            Ok(())
        }
    }

    fn force(&mut self, peer: usize) -> Result<(), OperationError> {
        let me = self.active(peer)?;
        let session = self.session_mut()?;
        if session.editor == me {
            return Err(OperationError::AlreadyEditor);
        }

        session.editor = me;
        self.clear_prompts();
        Ok(())
    }

    fn leave(&mut self, peer: usize) -> Result<(), OperationError> {
        match self.phases[peer] {
            Phase::Idle => Err(OperationError::NotInSession),
            Phase::Joining => {
                self.go_idle(peer);
                Ok(())
            },
            Phase::Active(_) if peer == 0 => self.end(0),
            Phase::Active(me) => {
                let session = self.session_mut()?;
                session.departed.insert(peer);
                session.users.remove(me);
                if session.editor == me {
                    session.editor = HOST_NAME;
                }

                for prompts in &mut self.prompts {
                    prompts.remove(me);
                }
                self.go_idle(peer);
                Ok(())
            },
        }
    }

    fn end(&mut self, peer: usize) -> Result<(), OperationError> {
        self.active(peer)?;
        if peer != 0 {
            return Err(OperationError::NotHost);
        }

        self.session = None;
        for i in 0..self.phases.len() {
            self.go_idle(i);
        }
        Ok(())
    }

    fn clear_prompts(&mut self) {
        for prompts in &mut self.prompts {
            prompts.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted(size: usize) -> ModelWorld {
        let mut world = ModelWorld::new(size);
        assert!(world.apply(&Operation::Host { peer: 0 }).is_ok());
        world
    }

    #[test]
    fn duplicate_name_leaves_joiner_idle() {
        let mut world = hosted(3);
        world.apply(&Operation::Join { peer: 1, name: NameChoice(1) });
        world.apply(&Operation::Join { peer: 2, name: NameChoice(1) });

        assert_eq!(world.observable_state()[2], PeerView::Idle);
        assert_eq!(world.users(), Some(vec!["alice", "bob"]));
    }

    #[test]
    fn editor_leaving_reverts_to_host() {
        let mut world = hosted(2);
        world.apply(&Operation::Join { peer: 1, name: NameChoice(1) });
        world.apply(&Operation::Force { peer: 1 });
        assert_eq!(world.editor(), Some("bob"));

        world.apply(&Operation::Leave { peer: 1 });
        assert_eq!(world.editor(), Some(HOST_NAME));
        assert_eq!(world.users(), Some(vec![HOST_NAME]));
    }

    #[test]
    fn departed_peer_cannot_rejoin_until_rehost() {
        let mut world = hosted(2);
        world.apply(&Operation::Join { peer: 1, name: NameChoice(1) });
        world.apply(&Operation::Leave { peer: 1 });
        world.apply(&Operation::Join { peer: 1, name: NameChoice(2) });
        assert_eq!(world.observable_state()[1], PeerView::Joining);

        world.apply(&Operation::End { peer: 0 });
        world.apply(&Operation::Host { peer: 0 });
        world.apply(&Operation::Join { peer: 1, name: NameChoice(2) });
        assert!(matches!(&world.observable_state()[1], PeerView::Active { me, .. } if me == "carol"));
    }

    #[test]
    fn request_prompts_the_editor_only() {
        let mut world = hosted(3);
        world.apply(&Operation::Join { peer: 1, name: NameChoice(1) });
        world.apply(&Operation::Join { peer: 2, name: NameChoice(2) });
        world.apply(&Operation::Request { peer: 2 });

        let views = world.observable_state();
        assert!(matches!(&views[0], PeerView::Active { pending, .. } if pending == &["carol"]));
        assert!(matches!(&views[1], PeerView::Active { pending, .. } if pending.is_empty()));
    }
}
