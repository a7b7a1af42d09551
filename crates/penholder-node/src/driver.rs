//! Session node driver.
//!
//! Owns the coordinator and the enforcer for one peer and turns everything
//! that happens to it (transport events, console commands, timer ticks) into
//! calls on them. Actions coming back are executed right away: frames go out
//! on links, everything else is rendered as a line for the console.
//!
//! ```text
//! TransportEvent ─┐
//! Command ────────┼─> Driver ─> Coordinator ─> CoordinatorAction
//! tick ───────────┘      │                       ├─ Multicast/Unicast -> Link
//!                        └─> Enforcer            └─ the rest -> output line
//! ```

use std::{collections::BTreeMap, time::Duration};

use penholder_core::{
    AttributionStrategy, CloseReason, ContentChange, Coordinator, CoordinatorAction,
    CoordinatorError, Enforcer, Environment, HostRelay, NoticeLevel, PromptOutcome, Relay, Role,
    SaveIntent, SaveVerdict, Verdict,
};
use penholder_proto::{PeerId, Username, WireFrame};
use tokio::sync::mpsc;

use crate::{
    config::NodeConfig,
    console::{Command, HELP},
    error::NodeError,
    transport::{Link, TransportEvent},
};

/// Event loop for one session peer.
pub struct Driver<E: Environment> {
    env: E,
    coordinator: Coordinator<E, HostRelay>,
    enforcer: Enforcer<E, AttributionStrategy>,
    links: BTreeMap<PeerId, Link>,
    output: mpsc::UnboundedSender<String>,
    tick_interval: Duration,
    done: bool,
}

impl<E: Environment> Driver<E> {
    /// Create a driver on top of `relay`. Console lines go to `output`.
    pub fn new(
        env: E,
        config: &NodeConfig,
        relay: HostRelay,
        output: mpsc::UnboundedSender<String>,
    ) -> Self {
        let mut coordinator = Coordinator::new(env.clone(), config.coordinator.clone());
        coordinator.attach(relay);
        let enforcer = Enforcer::new(env.clone(), AttributionStrategy, config.enforcement.clone());

        Self {
            env,
            coordinator,
            enforcer,
            links: BTreeMap::new(),
            output,
            tick_interval: config.tick_interval,
            done: false,
        }
    }

    /// Register an outbound link to `peer`.
    pub fn add_link(&mut self, peer: PeerId, link: Link) {
        self.links.insert(peer, link);
    }

    /// Host or join as `username`, depending on the relay's role.
    ///
    /// # Errors
    ///
    /// Returns the coordinator's refusal (bad username, already in a session).
    pub fn start(&mut self, username: &str) -> Result<(), NodeError> {
        let role = self.coordinator.relay().map(Relay::role);
        let actions = match role {
            Some(Role::Host) => self.coordinator.host_session(username)?,
            Some(Role::Guest) => self.coordinator.join_session(username)?,
            None => return Err(CoordinatorError::TransportUnavailable.into()),
        };
        self.execute(actions);
        Ok(())
    }

    /// The coordinator this driver feeds.
    pub fn coordinator(&self) -> &Coordinator<E, HostRelay> {
        &self.coordinator
    }

    /// Whether the driver has stopped.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { peer, link } => {
                tracing::debug!(%peer, "link registered");
                self.links.insert(peer, link);
            },
            TransportEvent::Frame { from, frame } => {
                let actions = self.coordinator.receive(from, frame);
                self.execute(actions);
            },
            TransportEvent::Disconnected { peer } => {
                self.links.remove(&peer);
                let actions = self.coordinator.peer_disconnected(peer);
                self.execute(actions);
            },
        }
    }

    /// Process one console command.
    pub fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Give(target) => self.coordinator.give_access(&target),
            Command::Request => self.coordinator.request_access(),
            Command::Force => self.coordinator.force_take_access(),
            Command::Accept(requester) => self.answer(requester, PromptOutcome::Accept),
            Command::Decline(requester) => self.answer(requester, PromptOutcome::Decline),
            Command::Leave => self.coordinator.leave_session(),
            Command::End => self.coordinator.end_session(),
            Command::Who => {
                self.who();
                Ok(Vec::new())
            },
            Command::Edit(document) => {
                self.edit(document);
                Ok(Vec::new())
            },
            Command::Save(document) => {
                self.save(document);
                Ok(Vec::new())
            },
            Command::Help => {
                self.say(HELP);
                Ok(Vec::new())
            },
            Command::Quit => {
                self.done = true;
                Ok(Vec::new())
            },
        };

        match result {
            Ok(actions) => self.execute(actions),
            Err(error) => self.say(format!("error: {error}")),
        }
    }

    /// Advance timers.
    pub fn tick(&mut self) {
        let actions = self.coordinator.tick();
        self.execute(actions);
    }

    /// Run until the session closes, a join fails or the user quits.
    ///
    /// Closing the command channel leaves the session gracefully. Queued
    /// frames are flushed before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let env = self.env.clone();
        let mut console_open = true;

        while !self.done {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv(), if console_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        console_open = false;
                        if !self.coordinator.is_idle() {
                            self.handle_command(Command::Leave);
                        }
                        self.done = true;
                    },
                },
                () = env.sleep(self.tick_interval) => {},
            }
            self.tick();
        }

        self.shutdown().await;
    }

    /// Close every link, waiting for queued frames to be written.
    pub async fn shutdown(&mut self) {
        for (peer, link) in std::mem::take(&mut self.links) {
            tracing::debug!(%peer, "closing link");
            link.close().await;
        }
    }

    fn answer(
        &mut self,
        requester: Option<String>,
        outcome: PromptOutcome,
    ) -> Result<Vec<CoordinatorAction>, CoordinatorError> {
        let requester = match requester {
            Some(raw) => Username::new(raw)?,
            None => match self.coordinator.pending_requests().into_iter().next() {
                Some(first) => first,
                None => {
                    self.say("no pending access requests");
                    return Ok(Vec::new());
                },
            },
        };
        self.coordinator.answer_access_request(&requester, outcome)
    }

    fn who(&self) {
        let Some(snapshot) = self.coordinator.snapshot() else {
            self.say("not in a session");
            return;
        };
        let members: Vec<&str> = snapshot.users.iter().map(Username::as_str).collect();
        self.say(format!(
            "host: {}, editor: {}, members: {}",
            snapshot.host,
            snapshot.editor,
            members.join(", ")
        ));
    }

    fn edit(&mut self, document: String) {
        let ctx = self.coordinator.enforcement_context();
        let change = ContentChange { document, origin: ctx.local_peer };

        match self.enforcer.check_change(&ctx, &change) {
            Verdict::Allow => self.say(format!("edited {}", change.document)),
            Verdict::Violation { document, warning, revert } => {
                if let Some(warning) = warning {
                    self.say(format!("warning: {warning}"));
                }
                if revert {
                    self.say(format!("reverted change to {document}"));
                }
            },
        }
    }

    fn save(&mut self, document: String) {
        let ctx = self.coordinator.enforcement_context();
        let intent = SaveIntent { document };

        match self.enforcer.check_save(&ctx, &intent) {
            SaveVerdict::Allow => self.say(format!("saved {}", intent.document)),
            SaveVerdict::Deny { message } => self.say(message),
        }
    }

    fn execute(&mut self, actions: Vec<CoordinatorAction>) {
        for action in actions {
            match action {
                CoordinatorAction::Multicast(frame) => self.multicast(&frame),
                CoordinatorAction::Unicast { to, frame } => self.unicast(to, frame),
                CoordinatorAction::JoinFailed(error) => {
                    self.say(format!("could not join: {error}"));
                    self.done = true;
                },
                CoordinatorAction::SessionClosed { reason } => {
                    self.enforcer.reset();
                    self.say(describe_close(reason));
                    self.done = true;
                },
                other => {
                    if let Some(line) = self.describe(&other) {
                        self.say(line);
                    }
                },
            }
        }
    }

    fn multicast(&self, frame: &WireFrame) {
        for (peer, link) in &self.links {
            if !link.send(frame.clone()) {
                tracing::debug!(%peer, "link closed, frame dropped");
            }
        }
    }

    fn unicast(&self, to: PeerId, frame: WireFrame) {
        match self.links.get(&to) {
            Some(link) => {
                if !link.send(frame) {
                    tracing::debug!(peer = %to, "link closed, frame dropped");
                }
            },
            None => tracing::debug!(peer = %to, "no link, frame dropped"),
        }
    }

    fn describe(&self, action: &CoordinatorAction) -> Option<String> {
        let me = self.coordinator.local_user();
        let name = |user: &Username| {
            if Some(user) == me { "you".to_string() } else { user.to_string() }
        };

        let line = match action {
            CoordinatorAction::SessionStarted { snapshot } if Some(&snapshot.editor) == me => {
                format!("in session hosted by {}; you have write access", snapshot.host)
            },
            CoordinatorAction::SessionStarted { snapshot } => {
                format!("in session hosted by {}; {} has write access", snapshot.host, snapshot.editor)
            },
            CoordinatorAction::MemberJoined { username } => format!("{username} joined"),
            CoordinatorAction::MemberLeft { username } => format!("{username} left"),
            CoordinatorAction::EditorChanged { from, to, forced: true } => {
                format!("{} took write access from {}", name(to), name(from))
            },
            CoordinatorAction::EditorChanged { from, to, forced: false } => {
                format!("{} gave write access to {}", name(from), name(to))
            },
            CoordinatorAction::PromptAccessRequest { requester } => {
                format!("{requester} requests write access (accept {requester} / decline {requester})")
            },
            CoordinatorAction::Notice { level: NoticeLevel::Info, message } => message.clone(),
            CoordinatorAction::Notice { level: NoticeLevel::Warning, message } => {
                format!("warning: {message}")
            },
            CoordinatorAction::Multicast(_)
            | CoordinatorAction::Unicast { .. }
            | CoordinatorAction::JoinFailed(_)
            | CoordinatorAction::SessionClosed { .. } => return None,
        };
        Some(line)
    }

    fn say(&self, line: impl Into<String>) {
        if self.output.send(line.into()).is_err() {
            tracing::debug!("console gone, line dropped");
        }
    }
}

fn describe_close(reason: CloseReason) -> &'static str {
    match reason {
        CloseReason::Ended => "session ended",
        CloseReason::Left => "left session",
        CloseReason::Removed => "removed from session",
        CloseReason::HostLost => "lost connection to host, session closed",
    }
}
