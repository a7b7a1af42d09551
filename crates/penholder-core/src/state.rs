//! Replicated session state.
//!
//! Every peer owns an independent replica and reconstructs it by applying the
//! same relayed events. Replicas are never shared; they converge only because
//! `apply` is deterministic, idempotent and resolves the order-sensitive pairs
//! the same way in either order:
//!
//! - leave vs. transfer to the leaver: the token reverts to the host
//! - join vs. transfer to the joiner: a transfer to a name never seen is held
//!   back until that name joins (or leaves)
//!
//! # Invariants
//!
//! - `host ∈ users` and `editor ∈ users` after every `apply`
//! - Every attributed peer maps to a member
//! - A departed peer is never attributed again (tombstones)

use std::collections::BTreeSet;

use penholder_proto::{PeerId, SessionSnapshot, Username};

use crate::error::CoordinatorError;

/// State-mutating events. Everything else on the wire is informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A peer was admitted.
    Join {
        /// Admitted name.
        username: Username,
        /// Admitted peer.
        peer_id: PeerId,
    },
    /// The write token moved.
    Transfer {
        /// Editor as seen by the sender.
        from: Username,
        /// New editor.
        to: Username,
    },
    /// A peer departed.
    Leave {
        /// Departing name.
        username: Username,
        /// Departing peer.
        peer_id: PeerId,
    },
    /// The host ended the session.
    End,
}

/// Observable effect of applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Event was already incorporated, stale, or a no-op.
    Unchanged,
    /// A new member appeared.
    Joined {
        /// New member.
        username: Username,
        /// Set when a transfer to the new member arrived before its join; the
        /// editor it replaced.
        took_editor_from: Option<Username>,
    },
    /// The editor changed.
    EditorChanged {
        /// Previous editor.
        from: Username,
        /// New editor.
        to: Username,
    },
    /// A member left.
    Left {
        /// Departed member.
        username: Username,
        /// Set when the departed member held the token and it reverted to the
        /// host.
        editor_reverted: bool,
    },
    /// The session is over; the caller must discard this replica.
    Ended,
}

/// One peer's replica of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    snapshot: SessionSnapshot,
    /// Transfer target not yet seen joining.
    held_transfer: Option<Username>,
}

impl SessionState {
    /// Bootstrap a new session on the host: host = editor = `username`.
    pub fn host(username: Username, host_peer: PeerId) -> Self {
        Self::from_snapshot(SessionSnapshot::hosted(username, host_peer))
    }

    /// Install the full snapshot a joiner receives from the host.
    ///
    /// # Errors
    ///
    /// Returns `CoordinatorError::MalformedState` if the snapshot violates the
    /// session invariants.
    pub fn install(snapshot: SessionSnapshot) -> Result<Self, CoordinatorError> {
        snapshot
            .validate()
            .map_err(|e| CoordinatorError::MalformedState { reason: e.to_string() })?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self { snapshot, held_transfer: None }
    }

    /// Read-only view of the replica.
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    /// Session creator.
    pub fn host_name(&self) -> &Username {
        &self.snapshot.host
    }

    /// Current write-token holder.
    pub fn editor(&self) -> &Username {
        &self.snapshot.editor
    }

    /// Current members, sorted.
    pub fn users(&self) -> &BTreeSet<Username> {
        &self.snapshot.users
    }

    /// Whether `username` is a member.
    pub fn is_member(&self, username: &Username) -> bool {
        self.snapshot.users.contains(username)
    }

    /// Resolve a transport identity to a member name.
    pub fn username_of(&self, peer_id: PeerId) -> Option<&Username> {
        self.snapshot.peers.get(&peer_id)
    }

    /// Whether `peer_id` is known to have left.
    pub fn has_departed(&self, peer_id: PeerId) -> bool {
        self.snapshot.departed.contains(&peer_id)
    }

    /// Transfer target that has not joined on this replica yet.
    pub fn held_transfer(&self) -> Option<&Username> {
        self.held_transfer.as_ref()
    }

    /// Apply one event. Total and idempotent.
    pub fn apply(&mut self, event: &SessionEvent) -> Applied {
        let applied = match event {
            SessionEvent::Join { username, peer_id } => self.apply_join(username, *peer_id),
            SessionEvent::Transfer { to, .. } => self.apply_transfer(to),
            SessionEvent::Leave { username, peer_id } => self.apply_leave(username, *peer_id),
            SessionEvent::End => Applied::Ended,
        };

        debug_assert!(self.snapshot.validate().is_ok(), "session invariants violated");
        applied
    }

    fn apply_join(&mut self, username: &Username, peer_id: PeerId) -> Applied {
        if self.snapshot.departed.contains(&peer_id) {
            tracing::debug!(%peer_id, %username, "ignoring join of departed peer");
            return Applied::Unchanged;
        }

        if let Some(existing) = self.snapshot.peers.get(&peer_id) {
            if existing != username {
                tracing::warn!(%peer_id, %existing, %username, "conflicting join ignored");
            }
            return Applied::Unchanged;
        }

        self.snapshot.peers.insert(peer_id, username.clone());
        self.snapshot.departed_names.remove(username);
        if !self.snapshot.users.insert(username.clone()) {
            return Applied::Unchanged;
        }

        let took_editor_from = if self.held_transfer.as_ref() == Some(username) {
            self.held_transfer = None;
            Some(std::mem::replace(&mut self.snapshot.editor, username.clone()))
        } else {
            None
        };

        Applied::Joined { username: username.clone(), took_editor_from }
    }

    fn apply_transfer(&mut self, to: &Username) -> Applied {
        self.held_transfer = None;

        // The sender saw `to` as a member. A name this replica has never seen
        // is a join still in flight; hold the transfer until it lands.
        if !self.snapshot.users.contains(to) && !self.snapshot.departed_names.contains(to) {
            tracing::debug!(%to, "holding transfer to a member not yet joined");
            self.held_transfer = Some(to.clone());
            return Applied::Unchanged;
        }

        // A transfer to someone who already left resolves exactly like
        // "transfer, then leave": the token reverts to the host.
        let target = if self.snapshot.users.contains(to) { to } else { &self.snapshot.host };
        self.set_editor(target.clone())
    }

    fn set_editor(&mut self, to: Username) -> Applied {
        if to == self.snapshot.editor {
            return Applied::Unchanged;
        }

        let from = std::mem::replace(&mut self.snapshot.editor, to.clone());
        Applied::EditorChanged { from, to }
    }

    fn apply_leave(&mut self, username: &Username, peer_id: PeerId) -> Applied {
        if !self.snapshot.departed.insert(peer_id) {
            return Applied::Unchanged;
        }

        // The attribution map is authoritative for which name the peer held.
        let departed_name = self.snapshot.peers.remove(&peer_id).unwrap_or_else(|| username.clone());

        let still_attributed = self.snapshot.peers.values().any(|name| *name == departed_name);
        if still_attributed || departed_name == self.snapshot.host {
            return Applied::Unchanged;
        }

        self.snapshot.departed_names.insert(departed_name.clone());

        if !self.snapshot.users.remove(&departed_name) {
            // Left before its join reached us; a held transfer to it resolves
            // as if it had joined, taken the token and left.
            if self.held_transfer.as_ref() == Some(&departed_name) {
                self.held_transfer = None;
                let host = self.snapshot.host.clone();
                return self.set_editor(host);
            }
            return Applied::Unchanged;
        }

        let editor_reverted = self.snapshot.editor == departed_name;
        if editor_reverted {
            self.snapshot.editor = self.snapshot.host.clone();
        }

        Applied::Left { username: departed_name, editor_reverted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> Username {
        Username::new(raw).expect("valid username")
    }

    fn alice_hosting() -> SessionState {
        SessionState::host(name("alice"), PeerId::HOST)
    }

    fn join(raw: &str, peer: u64) -> SessionEvent {
        SessionEvent::Join { username: name(raw), peer_id: PeerId::new(peer) }
    }

    fn leave(raw: &str, peer: u64) -> SessionEvent {
        SessionEvent::Leave { username: name(raw), peer_id: PeerId::new(peer) }
    }

    fn transfer(from: &str, to: &str) -> SessionEvent {
        SessionEvent::Transfer { from: name(from), to: name(to) }
    }

    #[test]
    fn hosted_state_has_host_as_editor() {
        let state = alice_hosting();
        assert_eq!(state.editor(), &name("alice"));
        assert_eq!(state.users().len(), 1);
        assert_eq!(state.username_of(PeerId::HOST), Some(&name("alice")));
    }

    #[test]
    fn join_adds_member_and_attribution() {
        let mut state = alice_hosting();
        assert_eq!(
            state.apply(&join("bob", 1)),
            Applied::Joined { username: name("bob"), took_editor_from: None }
        );
        assert!(state.is_member(&name("bob")));
        assert_eq!(state.username_of(PeerId::new(1)), Some(&name("bob")));
    }

    #[test]
    fn duplicate_join_is_unchanged() {
        let mut state = alice_hosting();
        state.apply(&join("bob", 1));
        let before = state.clone();

        assert_eq!(state.apply(&join("bob", 1)), Applied::Unchanged);
        assert_eq!(state, before);
    }

    #[test]
    fn transfer_moves_editor() {
        let mut state = alice_hosting();
        state.apply(&join("bob", 1));

        let applied = state.apply(&transfer("alice", "bob"));
        assert_eq!(applied, Applied::EditorChanged { from: name("alice"), to: name("bob") });
        assert_eq!(state.editor(), &name("bob"));
    }

    #[test]
    fn editor_leaving_reverts_to_host() {
        let mut state = alice_hosting();
        state.apply(&join("bob", 1));
        state.apply(&transfer("alice", "bob"));

        let applied = state.apply(&leave("bob", 1));
        assert_eq!(applied, Applied::Left { username: name("bob"), editor_reverted: true });
        assert_eq!(state.editor(), &name("alice"));
        assert!(!state.is_member(&name("bob")));
    }

    #[test]
    fn transfer_to_departed_member_reverts_to_host() {
        let mut state = alice_hosting();
        state.apply(&join("bob", 1));
        state.apply(&join("carol", 2));
        state.apply(&transfer("alice", "carol"));
        state.apply(&leave("bob", 1));

        state.apply(&transfer("carol", "bob"));
        assert_eq!(state.editor(), &name("alice"));
    }

    #[test]
    fn transfer_before_join_lands_on_join() {
        let mut state = alice_hosting();

        assert_eq!(state.apply(&transfer("alice", "bob")), Applied::Unchanged);
        assert_eq!(state.editor(), &name("alice"));
        assert_eq!(state.held_transfer(), Some(&name("bob")));

        let applied = state.apply(&join("bob", 1));
        assert_eq!(
            applied,
            Applied::Joined { username: name("bob"), took_editor_from: Some(name("alice")) }
        );
        assert_eq!(state.editor(), &name("bob"));
        assert_eq!(state.held_transfer(), None);
    }

    #[test]
    fn later_transfer_supersedes_held_one() {
        let mut state = alice_hosting();
        state.apply(&join("carol", 2));

        state.apply(&transfer("alice", "bob"));
        state.apply(&transfer("bob", "carol"));
        state.apply(&join("bob", 1));

        assert_eq!(state.editor(), &name("carol"));
    }

    #[test]
    fn held_transfer_to_leaver_reverts_to_host() {
        let mut state = alice_hosting();
        state.apply(&join("carol", 2));
        state.apply(&transfer("alice", "carol"));

        state.apply(&transfer("carol", "bob"));
        let applied = state.apply(&leave("bob", 1));
        assert_eq!(applied, Applied::EditorChanged { from: name("carol"), to: name("alice") });

        assert_eq!(state.apply(&join("bob", 1)), Applied::Unchanged);
        assert_eq!(state.editor(), &name("alice"));
    }

    #[test]
    fn leave_then_stale_join_stays_departed() {
        let mut state = alice_hosting();
        state.apply(&leave("bob", 1));

        assert_eq!(state.apply(&join("bob", 1)), Applied::Unchanged);
        assert!(!state.is_member(&name("bob")));
        assert!(state.has_departed(PeerId::new(1)));
    }

    #[test]
    fn stale_leave_does_not_remove_rejoined_name() {
        let mut state = alice_hosting();
        state.apply(&join("bob", 1));
        state.apply(&leave("bob", 1));
        state.apply(&join("bob", 2));

        assert_eq!(state.apply(&leave("bob", 1)), Applied::Unchanged);
        assert!(state.is_member(&name("bob")));
    }

    #[test]
    fn host_is_never_removed() {
        let mut state = alice_hosting();
        assert_eq!(state.apply(&leave("alice", 0)), Applied::Unchanged);
        assert!(state.is_member(&name("alice")));
    }

    #[test]
    fn end_reports_ended() {
        let mut state = alice_hosting();
        assert_eq!(state.apply(&SessionEvent::End), Applied::Ended);
    }

    #[test]
    fn install_rejects_malformed_snapshot() {
        let mut snapshot = SessionSnapshot::hosted(name("alice"), PeerId::HOST);
        snapshot.users.clear();

        let result = SessionState::install(snapshot);
        assert!(matches!(result, Err(CoordinatorError::MalformedState { .. })));
    }
}
