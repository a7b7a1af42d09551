//! Token coordinator state machine.
//!
//! The `Coordinator` owns one peer's view of the session and implements the
//! user-facing operations (host, join, give, request, force-take, leave, end)
//! on top of a [`Relay`]. Like the rest of this crate it performs no I/O:
//! every call returns [`CoordinatorAction`]s for the driver to execute.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --host_session--> Active
//! Idle --join_session--> Joining --JoinAccepted--> Active
//!                        Joining --JoinRejected/timeout--> Idle
//! Active --leave/end/Ended/host lost--> Idle
//! ```
//!
//! # Invariants
//!
//! - A failed operation leaves the coordinator exactly as it was.
//! - Session state changes only by applying relayed events, except for the
//!   host bootstrap and the joiner's snapshot install.
//! - Outside `Active` there is no session state at all.

use std::{
    collections::{BTreeSet, VecDeque},
    time::{Duration, Instant},
};

use bytes::Bytes;
use penholder_proto::{
    PeerId, RejectReason, SessionMessage, SessionSnapshot, Topic, Username, WireFrame, codec,
};

use crate::{
    enforce::EnforcementContext,
    env::Environment,
    error::CoordinatorError,
    relay::{Relay, RelayAction, Role},
    state::{Applied, SessionEvent, SessionState},
};

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// How long a join may wait for the host's answer.
    pub join_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { join_timeout: Duration::from_secs(10) }
    }
}

/// The user's answer to an access request prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Hand the token over.
    Accept,
    /// Keep the token and tell the requester.
    Decline,
    /// Prompt was dismissed. Nothing happens.
    Cancelled,
}

/// Severity of a user notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something the user should act on.
    Warning,
}

/// Why the local session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The host ended the session.
    Ended,
    /// The local user left.
    Left,
    /// The host announced the local peer as departed.
    Removed,
    /// The connection to the host was lost.
    HostLost,
}

/// Work produced by the coordinator for the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Send the frame to every other connected peer.
    Multicast(WireFrame),

    /// Send the frame to one peer.
    Unicast {
        /// Destination peer.
        to: PeerId,
        /// Frame to send.
        frame: WireFrame,
    },

    /// The local peer is now in a session.
    SessionStarted {
        /// State at the moment of joining.
        snapshot: SessionSnapshot,
    },

    /// Another member joined.
    MemberJoined {
        /// New member.
        username: Username,
    },

    /// A member left.
    MemberLeft {
        /// Departed member.
        username: Username,
    },

    /// The write token moved.
    EditorChanged {
        /// Previous editor.
        from: Username,
        /// New editor.
        to: Username,
        /// Taken without consent.
        forced: bool,
    },

    /// Ask the local user (the editor) whether to yield to `requester`.
    ///
    /// Answer with [`Coordinator::answer_access_request`].
    PromptAccessRequest {
        /// User asking for the token.
        requester: Username,
    },

    /// Message for the local user.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Text to show.
        message: String,
    },

    /// A pending join failed.
    JoinFailed(CoordinatorError),

    /// The local session is over. All session state has been discarded.
    SessionClosed {
        /// Why.
        reason: CloseReason,
    },
}

/// Where the local peer is in the session lifecycle.
#[derive(Debug)]
enum Phase {
    Idle,
    Joining {
        username: Username,
        deadline: Instant,
        /// Membership and token traffic that beat our acceptance.
        early: Vec<(PeerId, SessionMessage)>,
    },
    Active {
        me: Username,
        state: SessionState,
        /// Requesters awaiting the local editor's answer.
        prompts: BTreeSet<Username>,
    },
}

/// A message the coordinator wants to put on the relay.
#[derive(Debug)]
enum Outgoing {
    Broadcast(SessionMessage),
    ToHost(SessionMessage),
    Reply { to: PeerId, message: SessionMessage },
}

/// Token coordinator for one peer.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time
/// - `R`: Relay strategy in use
pub struct Coordinator<E: Environment, R: Relay> {
    env: E,
    config: CoordinatorConfig,
    relay: Option<R>,
    phase: Phase,
}

impl<E: Environment, R: Relay> Coordinator<E, R> {
    /// Create an idle coordinator with no transport attached.
    pub fn new(env: E, config: CoordinatorConfig) -> Self {
        Self { env, config, relay: None, phase: Phase::Idle }
    }

    /// Attach a transport link. Subscribes every protocol topic.
    pub fn attach(&mut self, mut relay: R) {
        for topic in Topic::ALL {
            relay.subscribe(Topic::new(topic));
        }
        relay.restrict_to_host(Topic::new(Topic::LIFECYCLE));
        self.relay = Some(relay);
    }

    /// Detach the transport. Any session or pending join is dropped.
    pub fn detach(&mut self) -> (Option<R>, Vec<CoordinatorAction>) {
        let actions = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => Vec::new(),
            Phase::Joining { .. } => {
                vec![CoordinatorAction::JoinFailed(CoordinatorError::TransportUnavailable)]
            },
            Phase::Active { .. } => {
                vec![CoordinatorAction::SessionClosed { reason: CloseReason::HostLost }]
            },
        };
        (self.relay.take(), actions)
    }

    /// Attached relay, if any.
    pub fn relay(&self) -> Option<&R> {
        self.relay.as_ref()
    }

    /// Replicated session state, if in a session.
    pub fn snapshot(&self) -> Option<&SessionSnapshot> {
        match &self.phase {
            Phase::Active { state, .. } => Some(state.snapshot()),
            Phase::Idle | Phase::Joining { .. } => None,
        }
    }

    /// Local display name, if in a session.
    pub fn local_user(&self) -> Option<&Username> {
        match &self.phase {
            Phase::Active { me, .. } => Some(me),
            Phase::Idle | Phase::Joining { .. } => None,
        }
    }

    /// Whether the local user holds the write token.
    pub fn is_editor(&self) -> bool {
        match &self.phase {
            Phase::Active { me, state, .. } => state.editor() == me,
            Phase::Idle | Phase::Joining { .. } => false,
        }
    }

    /// Whether no session is active or pending.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Whether a join is waiting for the host.
    pub fn is_joining(&self) -> bool {
        matches!(self.phase, Phase::Joining { .. })
    }

    /// Access requests the local editor has not answered yet.
    pub fn pending_requests(&self) -> Vec<Username> {
        match &self.phase {
            Phase::Active { prompts, .. } => prompts.iter().cloned().collect(),
            Phase::Idle | Phase::Joining { .. } => Vec::new(),
        }
    }

    /// What the enforcer needs to judge local changes.
    pub fn enforcement_context(&self) -> EnforcementContext {
        let local_peer = self.relay.as_ref().map(Relay::local_peer);
        match &self.phase {
            Phase::Active { me, state, .. } => EnforcementContext {
                local_peer,
                local_user: Some(me.clone()),
                editor: Some(state.editor().clone()),
            },
            Phase::Idle | Phase::Joining { .. } => {
                EnforcementContext { local_peer, ..EnforcementContext::detached() }
            },
        }
    }

    /// Start a new session with the local user as host and editor.
    ///
    /// # Errors
    ///
    /// - `AlreadyInSession` unless idle
    /// - `TransportUnavailable` without a transport link on which this peer
    ///   is the host
    /// - `InvalidUsername` if the name fails validation
    pub fn host_session(&mut self, username: &str) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if !self.is_idle() {
            return Err(CoordinatorError::AlreadyInSession);
        }

        let relay = self.relay.as_ref().ok_or(CoordinatorError::TransportUnavailable)?;
        if relay.role() != Role::Host {
            return Err(CoordinatorError::TransportUnavailable);
        }
        let local_peer = relay.local_peer();

        let me = Username::new(username)?;
        let state = SessionState::host(me.clone(), local_peer);
        let snapshot = state.snapshot().clone();

        tracing::info!(host = %me, "session hosted");
        self.phase = Phase::Active { me, state, prompts: BTreeSet::new() };

        Ok(vec![CoordinatorAction::SessionStarted { snapshot }])
    }

    /// Ask the host to admit the local user.
    ///
    /// The outcome arrives later as `SessionStarted`, or as
    /// `JoinFailed(NameTaken | NoSessionFound)`.
    ///
    /// # Errors
    ///
    /// - `AlreadyInSession` unless idle
    /// - `TransportUnavailable` without a transport link
    /// - `NoSessionFound` if this peer is the transport host (there is no one
    ///   to join)
    /// - `InvalidUsername` if the name fails validation
    pub fn join_session(&mut self, username: &str) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if !self.is_idle() {
            return Err(CoordinatorError::AlreadyInSession);
        }

        let relay = self.relay.as_ref().ok_or(CoordinatorError::TransportUnavailable)?;
        if relay.role() == Role::Host {
            return Err(CoordinatorError::NoSessionFound);
        }

        let username = Username::new(username)?;
        let relay_actions =
            self.publish(Outgoing::ToHost(SessionMessage::JoinRequest { username: username.clone() }))?;

        tracing::info!(%username, "joining session");
        let deadline = self.env.now() + self.config.join_timeout;
        self.phase = Phase::Joining { username, deadline, early: Vec::new() };

        Ok(self.run(relay_actions, Vec::new()))
    }

    /// Hand the write token to `target`.
    ///
    /// # Errors
    ///
    /// - `NotInSession` outside a session
    /// - `NotEditor` unless the local user holds the token
    /// - `InvalidTarget` unless `target` is another current member
    pub fn give_access(&mut self, target: &str) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let Phase::Active { me, state, .. } = &self.phase else {
            return Err(CoordinatorError::NotInSession);
        };

        if state.editor() != me {
            return Err(CoordinatorError::NotEditor);
        }

        let target = Username::new(target)?;
        if target == *me || !state.is_member(&target) {
            return Err(CoordinatorError::InvalidTarget { username: target });
        }

        let transfer = SessionMessage::Transfer { from: me.clone(), to: target, forced: false };
        let relay_actions = self.publish(Outgoing::Broadcast(transfer))?;
        Ok(self.run(relay_actions, Vec::new()))
    }

    /// Ask the current editor to yield.
    ///
    /// # Errors
    ///
    /// - `NotInSession` outside a session
    /// - `AlreadyEditor` if the local user holds the token
    pub fn request_access(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let Phase::Active { me, state, .. } = &self.phase else {
            return Err(CoordinatorError::NotInSession);
        };

        if state.editor() == me {
            return Err(CoordinatorError::AlreadyEditor);
        }

        let notice = CoordinatorAction::Notice {
            level: NoticeLevel::Info,
            message: format!("Requested write access from {}.", state.editor()),
        };
        let request = SessionMessage::AccessRequested { from: me.clone() };

        let relay_actions = self.publish(Outgoing::Broadcast(request))?;
        Ok(self.run(relay_actions, vec![notice]))
    }

    /// Answer a `PromptAccessRequest`.
    ///
    /// Accepting performs [`Coordinator::give_access`]. Declining tells the
    /// requester. A cancelled prompt changes nothing.
    ///
    /// # Errors
    ///
    /// - `NotInSession` outside a session
    /// - `NotEditor` if the token moved away while the prompt was open
    /// - `InvalidTarget` if the requester has left in the meantime
    pub fn answer_access_request(
        &mut self,
        requester: &Username,
        outcome: PromptOutcome,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let Phase::Active { me, state, prompts } = &mut self.phase else {
            return Err(CoordinatorError::NotInSession);
        };

        match outcome {
            PromptOutcome::Cancelled => {
                prompts.remove(requester);
                Ok(Vec::new())
            },
            PromptOutcome::Decline => {
                if *state.editor() != *me {
                    return Err(CoordinatorError::NotEditor);
                }
                prompts.remove(requester);

                let declined =
                    SessionMessage::AccessDeclined { by: me.clone(), requester: requester.clone() };
                let relay_actions = self.publish(Outgoing::Broadcast(declined))?;
                Ok(self.run(relay_actions, Vec::new()))
            },
            PromptOutcome::Accept => {
                let actions = self.give_access(requester.as_str())?;
                if let Phase::Active { prompts, .. } = &mut self.phase {
                    prompts.remove(requester);
                }
                Ok(actions)
            },
        }
    }

    /// Take the write token without the editor's consent.
    ///
    /// # Errors
    ///
    /// - `NotInSession` outside a session
    /// - `AlreadyEditor` if the local user holds the token
    pub fn force_take_access(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let Phase::Active { me, state, .. } = &self.phase else {
            return Err(CoordinatorError::NotInSession);
        };

        if state.editor() == me {
            return Err(CoordinatorError::AlreadyEditor);
        }

        let transfer =
            SessionMessage::Transfer { from: state.editor().clone(), to: me.clone(), forced: true };
        let relay_actions = self.publish(Outgoing::Broadcast(transfer))?;
        Ok(self.run(relay_actions, Vec::new()))
    }

    /// Leave the session.
    ///
    /// A guest announces its departure and is idle immediately. A pending
    /// join is abandoned. The host cannot leave its own relay; leaving ends
    /// the session for everyone.
    ///
    /// # Errors
    ///
    /// - `NotInSession` if idle
    pub fn leave_session(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let Some(relay) = self.relay.as_ref() else {
            return Err(CoordinatorError::NotInSession);
        };
        let local_peer = relay.local_peer();
        let is_host = relay.role() == Role::Host;

        if is_host && matches!(self.phase, Phase::Active { .. }) {
            return self.end_session();
        }

        match &mut self.phase {
            Phase::Idle => Err(CoordinatorError::NotInSession),
            Phase::Joining { username, .. } => {
                tracing::info!(%username, "join abandoned");
                self.phase = Phase::Idle;
                Ok(vec![CoordinatorAction::SessionClosed { reason: CloseReason::Left }])
            },
            Phase::Active { me, state, .. } => {
                let left = SessionMessage::Left { username: me.clone(), peer_id: local_peer };
                state.apply(&SessionEvent::Leave { username: me.clone(), peer_id: local_peer });
                tracing::info!(username = %me, "left session");

                // Idle before publishing so our own echo is ignored.
                self.phase = Phase::Idle;
                let relay_actions = self.publish(Outgoing::Broadcast(left))?;
                Ok(self.run(relay_actions, vec![CoordinatorAction::SessionClosed {
                    reason: CloseReason::Left,
                }]))
            },
        }
    }

    /// End the session for every member.
    ///
    /// # Errors
    ///
    /// - `NotInSession` outside a session
    /// - `NotHost` unless the local peer hosts the session
    pub fn end_session(&mut self) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        if !matches!(self.phase, Phase::Active { .. }) {
            return Err(CoordinatorError::NotInSession);
        }

        let is_host = self.relay.as_ref().is_some_and(|relay| relay.role() == Role::Host);
        if !is_host {
            return Err(CoordinatorError::NotHost);
        }

        let relay_actions = self.publish(Outgoing::Broadcast(SessionMessage::Ended))?;

        tracing::info!("session ended");
        self.phase = Phase::Idle;
        Ok(self.run(relay_actions, vec![CoordinatorAction::SessionClosed {
            reason: CloseReason::Ended,
        }]))
    }

    /// The transport lost `peer` without a graceful leave.
    ///
    /// On the host this synthesizes a `Left` for the vanished member. On a
    /// guest, losing the host is fatal: there is no failover.
    pub fn peer_disconnected(&mut self, peer: PeerId) -> Vec<CoordinatorAction> {
        let Some(relay) = self.relay.as_ref() else {
            return Vec::new();
        };
        let role = relay.role();
        let host_peer = relay.host_peer();

        match role {
            Role::Host => {
                let Phase::Active { state, .. } = &self.phase else {
                    return Vec::new();
                };
                let Some(username) = state.username_of(peer).cloned() else {
                    tracing::debug!(%peer, "disconnect of non-member");
                    return Vec::new();
                };

                tracing::info!(%peer, %username, "member vanished");
                let left = SessionMessage::Left { username, peer_id: peer };
                match self.publish(Outgoing::Broadcast(left)) {
                    Ok(relay_actions) => self.run(relay_actions, Vec::new()),
                    Err(error) => {
                        tracing::warn!(%error, "failed to announce departure");
                        Vec::new()
                    },
                }
            },
            Role::Guest if peer == host_peer => {
                match std::mem::replace(&mut self.phase, Phase::Idle) {
                    Phase::Idle => Vec::new(),
                    Phase::Joining { .. } => {
                        vec![CoordinatorAction::JoinFailed(CoordinatorError::NoSessionFound)]
                    },
                    Phase::Active { .. } => {
                        tracing::warn!("lost connection to host");
                        vec![CoordinatorAction::SessionClosed { reason: CloseReason::HostLost }]
                    },
                }
            },
            Role::Guest => Vec::new(),
        }
    }

    /// Expire a join that has waited too long.
    pub fn tick(&mut self) -> Vec<CoordinatorAction> {
        let now = self.env.now();
        match &self.phase {
            Phase::Joining { deadline, username, .. } if now >= *deadline => {
                tracing::info!(%username, "join timed out");
                self.phase = Phase::Idle;
                vec![CoordinatorAction::JoinFailed(CoordinatorError::NoSessionFound)]
            },
            _ => Vec::new(),
        }
    }

    /// Process a frame received from `from`.
    ///
    /// Frames the relay refuses and payloads that fail to decode are dropped
    /// with a warning.
    pub fn receive(&mut self, from: PeerId, frame: WireFrame) -> Vec<CoordinatorAction> {
        let Some(relay) = self.relay.as_mut() else {
            tracing::debug!(%from, "frame without transport, dropping");
            return Vec::new();
        };

        match relay.receive(from, frame) {
            Ok(relay_actions) => self.run(relay_actions, Vec::new()),
            Err(error) => {
                tracing::warn!(%from, %error, "relay rejected frame");
                Vec::new()
            },
        }
    }

    /// Encode and hand a message to the relay.
    fn publish(&mut self, outgoing: Outgoing) -> Result<Vec<RelayAction>, CoordinatorError> {
        let relay = self.relay.as_mut().ok_or(CoordinatorError::TransportUnavailable)?;

        let (message, target) = match outgoing {
            Outgoing::Broadcast(message) => (message, None),
            Outgoing::ToHost(message) => (message, Some(relay.host_peer())),
            Outgoing::Reply { to, message } => (message, Some(to)),
        };

        tracing::debug!(kind = message.kind(), ?target, "publishing");

        let topic = Topic::new(message.topic());
        let payload =
            codec::encode(&message).map_err(|e| CoordinatorError::Codec { reason: e.to_string() })?;

        Ok(match target {
            None => relay.send(topic, payload),
            Some(to) if to == relay.host_peer() => relay.send_to_host(topic, payload),
            Some(to) => relay.reply(to, topic, payload),
        })
    }

    /// Drain relay work: transport sends become actions, local deliveries
    /// are dispatched (and may publish further messages).
    fn run(
        &mut self,
        relay_actions: Vec<RelayAction>,
        mut out: Vec<CoordinatorAction>,
    ) -> Vec<CoordinatorAction> {
        let mut queue: VecDeque<RelayAction> = relay_actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                RelayAction::Multicast(frame) => out.push(CoordinatorAction::Multicast(frame)),
                RelayAction::Unicast { to, frame } => {
                    out.push(CoordinatorAction::Unicast { to, frame });
                },
                RelayAction::Deliver { origin, topic, payload } => {
                    for outgoing in self.dispatch(origin, &topic, &payload, &mut out) {
                        match self.publish(outgoing) {
                            Ok(more) => queue.extend(more),
                            Err(error) => tracing::warn!(%error, "failed to publish response"),
                        }
                    }
                },
            }
        }

        out
    }

    /// Handle one delivered message.
    fn dispatch(
        &mut self,
        origin: PeerId,
        topic: &Topic,
        payload: &Bytes,
        out: &mut Vec<CoordinatorAction>,
    ) -> Vec<Outgoing> {
        let message: SessionMessage = match codec::decode(payload) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(%origin, %topic, %error, "undecodable payload");
                return Vec::new();
            },
        };

        if message.topic() != topic.as_str() {
            tracing::warn!(%origin, %topic, kind = message.kind(), "message on wrong topic");
            return Vec::new();
        }

        tracing::debug!(%origin, kind = message.kind(), "delivered");

        let Some(relay) = self.relay.as_ref() else {
            return Vec::new();
        };
        let local_peer = relay.local_peer();
        let host_peer = relay.host_peer();
        let is_host = relay.role() == Role::Host;

        match message {
            SessionMessage::JoinRequest { username } if is_host => {
                self.on_join_request(origin, username)
            },
            SessionMessage::JoinRequest { username } => {
                tracing::debug!(%origin, %username, "join request on non-host, ignoring");
                Vec::new()
            },
            SessionMessage::JoinAccepted { .. } | SessionMessage::JoinRejected { .. }
                if origin != host_peer =>
            {
                tracing::warn!(%origin, "membership verdict from non-host, ignoring");
                Vec::new()
            },
            SessionMessage::JoinAccepted { username, peer_id, snapshot } => {
                self.on_join_accepted(local_peer, host_peer, username, peer_id, snapshot, out);
                Vec::new()
            },
            SessionMessage::JoinRejected { username, peer_id, reason } => {
                self.on_join_rejected(local_peer, username, peer_id, reason, out);
                Vec::new()
            },
            // Host traffic shares a link with our acceptance and is already in
            // the snapshot. Other senders may be ahead of it.
            early @ (SessionMessage::Transfer { .. } | SessionMessage::Left { .. })
                if self.is_joining() && origin != host_peer =>
            {
                if let Phase::Joining { early: held, .. } = &mut self.phase {
                    held.push((origin, early));
                }
                Vec::new()
            },
            SessionMessage::Transfer { from, to, forced } => {
                self.on_transfer(from, to, forced, out);
                Vec::new()
            },
            SessionMessage::AccessRequested { from } => {
                self.on_access_requested(from, out);
                Vec::new()
            },
            SessionMessage::AccessDeclined { by, requester } => {
                self.on_access_declined(by, requester, out);
                Vec::new()
            },
            SessionMessage::Left { username, peer_id } => {
                self.on_left(origin, local_peer, host_peer, username, peer_id, out);
                Vec::new()
            },
            SessionMessage::Ended => {
                if origin == host_peer {
                    self.on_ended(out);
                } else {
                    tracing::warn!(%origin, "end from non-host, ignoring");
                }
                Vec::new()
            },
        }
    }

    fn on_join_request(&mut self, origin: PeerId, username: Username) -> Vec<Outgoing> {
        let Phase::Active { state, .. } = &self.phase else {
            tracing::info!(%origin, %username, "join request without a session");
            let message = SessionMessage::JoinRejected {
                username,
                peer_id: origin,
                reason: RejectReason::NoSession,
            };
            return vec![Outgoing::Reply { to: origin, message }];
        };

        if let Some(existing) = state.username_of(origin) {
            if *existing != username {
                tracing::warn!(%origin, %existing, %username, "peer already joined under another name");
                return Vec::new();
            }

            // Retried request: the acceptance may have been lost.
            let message = SessionMessage::JoinAccepted {
                username,
                peer_id: origin,
                snapshot: state.snapshot().clone(),
            };
            return vec![Outgoing::Broadcast(message)];
        }

        if state.has_departed(origin) {
            tracing::debug!(%origin, %username, "join request from departed peer");
            return Vec::new();
        }

        if state.is_member(&username) {
            tracing::info!(%origin, %username, "join rejected, name taken");
            let message = SessionMessage::JoinRejected {
                username,
                peer_id: origin,
                reason: RejectReason::NameTaken,
            };
            return vec![Outgoing::Reply { to: origin, message }];
        }

        let mut next = state.clone();
        next.apply(&SessionEvent::Join { username: username.clone(), peer_id: origin });

        let message =
            SessionMessage::JoinAccepted { username, peer_id: origin, snapshot: next.snapshot().clone() };
        vec![Outgoing::Broadcast(message)]
    }

    fn on_join_accepted(
        &mut self,
        local_peer: PeerId,
        host_peer: PeerId,
        username: Username,
        peer_id: PeerId,
        snapshot: SessionSnapshot,
        out: &mut Vec<CoordinatorAction>,
    ) {
        match &mut self.phase {
            Phase::Joining { username: pending, early, .. } if peer_id == local_peer => {
                if *pending != username {
                    tracing::warn!(%pending, %username, "acceptance for a different name");
                    return;
                }

                if snapshot.peers.get(&local_peer) != Some(&username) {
                    self.phase = Phase::Idle;
                    out.push(CoordinatorAction::JoinFailed(CoordinatorError::MalformedState {
                        reason: format!("snapshot does not attribute {local_peer} to {username}"),
                    }));
                    return;
                }

                match SessionState::install(snapshot) {
                    Ok(state) => {
                        tracing::info!(%username, editor = %state.editor(), "joined session");
                        let early = std::mem::take(early);
                        out.push(CoordinatorAction::SessionStarted { snapshot: state.snapshot().clone() });
                        self.phase = Phase::Active { me: username, state, prompts: BTreeSet::new() };

                        // The snapshot may predate these; both kinds are idempotent.
                        for (origin, message) in early {
                            match message {
                                SessionMessage::Transfer { from, to, forced } => {
                                    self.on_transfer(from, to, forced, out);
                                },
                                SessionMessage::Left { username, peer_id } => {
                                    self.on_left(origin, local_peer, host_peer, username, peer_id, out);
                                },
                                _ => {},
                            }
                        }
                    },
                    Err(error) => {
                        tracing::warn!(%error, "rejecting malformed snapshot");
                        self.phase = Phase::Idle;
                        out.push(CoordinatorAction::JoinFailed(error));
                    },
                }
            },
            Phase::Active { me, state, prompts } => {
                let Applied::Joined { username, took_editor_from } =
                    state.apply(&SessionEvent::Join { username, peer_id })
                else {
                    return;
                };

                tracing::info!(%username, %peer_id, "member joined");
                out.push(CoordinatorAction::MemberJoined { username: username.clone() });

                // A transfer that beat the join here. It moved the token off
                // us without our own send, so it can only have been a force.
                if let Some(from) = took_editor_from {
                    let forced = from == *me;
                    Self::editor_moved(me, prompts, from, username, forced, out);
                }
            },
            Phase::Idle | Phase::Joining { .. } => {},
        }
    }

    fn on_join_rejected(
        &mut self,
        local_peer: PeerId,
        username: Username,
        peer_id: PeerId,
        reason: RejectReason,
        out: &mut Vec<CoordinatorAction>,
    ) {
        if peer_id != local_peer || !self.is_joining() {
            return;
        }

        tracing::info!(%username, ?reason, "join rejected");
        self.phase = Phase::Idle;

        let error = match reason {
            RejectReason::NameTaken => CoordinatorError::NameTaken { username },
            RejectReason::NoSession => CoordinatorError::NoSessionFound,
        };
        out.push(CoordinatorAction::JoinFailed(error));
    }

    fn on_transfer(
        &mut self,
        from: Username,
        to: Username,
        forced: bool,
        out: &mut Vec<CoordinatorAction>,
    ) {
        let Phase::Active { me, state, prompts } = &mut self.phase else {
            return;
        };

        let event = SessionEvent::Transfer { from, to };
        let Applied::EditorChanged { from, to } = state.apply(&event) else {
            return;
        };

        Self::editor_moved(me, prompts, from, to, forced, out);
    }

    fn editor_moved(
        me: &Username,
        prompts: &mut BTreeSet<Username>,
        from: Username,
        to: Username,
        forced: bool,
        out: &mut Vec<CoordinatorAction>,
    ) {
        tracing::info!(%from, %to, forced, "editor changed");

        if *me != to {
            prompts.clear();
        }

        if forced && *me == from {
            out.push(CoordinatorAction::Notice {
                level: NoticeLevel::Warning,
                message: format!("{to} took write access from you."),
            });
        }

        out.push(CoordinatorAction::EditorChanged { from, to, forced });
    }

    fn on_access_requested(&mut self, from: Username, out: &mut Vec<CoordinatorAction>) {
        let Phase::Active { me, state, prompts } = &mut self.phase else {
            return;
        };

        if from == *me || !state.is_member(&from) {
            return;
        }

        if *state.editor() == *me {
            if prompts.insert(from.clone()) {
                out.push(CoordinatorAction::PromptAccessRequest { requester: from });
            }
        } else {
            out.push(CoordinatorAction::Notice {
                level: NoticeLevel::Info,
                message: format!("{from} requested write access from {}.", state.editor()),
            });
        }
    }

    fn on_access_declined(
        &mut self,
        by: Username,
        requester: Username,
        out: &mut Vec<CoordinatorAction>,
    ) {
        let Phase::Active { me, .. } = &self.phase else {
            return;
        };

        if requester == *me {
            out.push(CoordinatorAction::Notice {
                level: NoticeLevel::Warning,
                message: format!("{by} declined your request for write access."),
            });
        }
    }

    fn on_left(
        &mut self,
        origin: PeerId,
        local_peer: PeerId,
        host_peer: PeerId,
        username: Username,
        peer_id: PeerId,
        out: &mut Vec<CoordinatorAction>,
    ) {
        let Phase::Active { me, state, prompts } = &mut self.phase else {
            return;
        };

        if peer_id == local_peer {
            // Only the host can remove a guest, and no one can remove the host.
            if origin != host_peer || local_peer == host_peer {
                tracing::warn!(%origin, %username, "departure of local peer from non-host, ignoring");
                return;
            }
            tracing::warn!(%username, "host reported us as departed");
            self.phase = Phase::Idle;
            out.push(CoordinatorAction::SessionClosed { reason: CloseReason::Removed });
            return;
        }

        let event = SessionEvent::Leave { username, peer_id };
        let (username, editor_reverted) = match state.apply(&event) {
            Applied::Left { username, editor_reverted } => (username, editor_reverted),
            Applied::EditorChanged { from, to } => {
                // A held transfer to a peer that left before its join reached us.
                tracing::debug!(%peer_id, "held transfer reverted to host");
                Self::editor_moved(me, prompts, from, to, false, out);
                return;
            },
            _ => return,
        };

        tracing::info!(%username, %peer_id, editor_reverted, "member left");
        prompts.remove(&username);
        out.push(CoordinatorAction::MemberLeft { username: username.clone() });

        if editor_reverted {
            out.push(CoordinatorAction::EditorChanged {
                from: username,
                to: state.host_name().clone(),
                forced: false,
            });
        }
    }

    fn on_ended(&mut self, out: &mut Vec<CoordinatorAction>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {},
            Phase::Joining { .. } => {
                out.push(CoordinatorAction::JoinFailed(CoordinatorError::NoSessionFound));
            },
            Phase::Active { .. } => {
                tracing::info!("session ended by host");
                out.push(CoordinatorAction::SessionClosed { reason: CloseReason::Ended });
            },
        }
    }
}
