//! Driver for the shared-lock-file variant.
//!
//! There is no transport: commands rewrite the lock file directly, and a
//! [`LockWatcher`] task reports what other processes wrote.

use penholder_core::{
    ContentChange, EnforcementContext, Enforcer, Environment, SaveIntent, SaveVerdict, Verdict,
};
use penholder_lockfile::{
    LockChange, LockError, LockFile, LockFileStrategy, LockSession, LockWatcher,
};
use penholder_proto::Username;
use tokio::sync::mpsc;

use crate::{
    config::LockConfig,
    console::{Command, HELP},
    error::NodeError,
};

/// Event loop for one lock-file participant.
pub struct LockDriver<E: Environment> {
    env: E,
    config: LockConfig,
    session: LockSession,
    enforcer: Enforcer<E, LockFileStrategy>,
    output: mpsc::UnboundedSender<String>,
    done: bool,
}

impl<E: Environment> LockDriver<E> {
    /// Create a driver for `config.username` under `config.root`.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::InvalidUsername` if the username is invalid.
    pub fn new(
        env: E,
        config: LockConfig,
        output: mpsc::UnboundedSender<String>,
    ) -> Result<Self, NodeError> {
        let me = Username::new(&config.username)?;
        let file = LockFile::in_root(&config.root);
        let session = LockSession::new(file.clone(), me.clone());
        let enforcer = Enforcer::new(
            env.clone(),
            LockFileStrategy::new(file, me),
            config.enforcement.clone(),
        );

        Ok(Self { env, config, session, enforcer, output, done: false })
    }

    /// Local lock handle.
    pub fn session(&self) -> &LockSession {
        &self.session
    }

    /// Whether the driver has stopped.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Register in the lock file.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Lock` if the file cannot be written.
    pub fn start(&mut self) -> Result<(), NodeError> {
        let record = self.session.join()?;
        let line = if record.is_owner(self.session.username()) {
            "you hold the lock".to_string()
        } else {
            format!("joined; {} holds the lock", record.owner)
        };
        self.say(line);
        Ok(())
    }

    /// Process one console command.
    pub fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Give(target) => self.give(&target),
            Command::Request => self.session.request().map(|_| self.say("lock requested")),
            Command::Force => self.session.take().map(|_| self.say("you took the lock")),
            Command::Accept(requester) => self.answer(requester, true),
            Command::Decline(requester) => self.answer(requester, false),
            Command::Leave => self.session.leave().map(|_| {
                self.say("left lock");
                self.done = true;
            }),
            Command::End => {
                self.say("lock mode has no host; use `leave`");
                Ok(())
            },
            Command::Who => self.who(),
            Command::Edit(document) => {
                self.edit(document);
                Ok(())
            },
            Command::Save(document) => {
                self.save(document);
                Ok(())
            },
            Command::Help => {
                self.say(HELP);
                Ok(())
            },
            Command::Quit => {
                self.done = true;
                Ok(())
            },
        };

        if let Err(error) = result {
            self.say(format!("error: {error}"));
            if error.is_fatal() {
                self.done = true;
            }
        }
    }

    /// Report a change another process made to the lock file.
    pub fn handle_change(&mut self, change: &LockChange) {
        let me = self.session.username();

        let Some(current) = &change.current else {
            if change.previous.is_some() {
                self.say("lock file removed");
            }
            return;
        };

        if change.owner_changed() {
            let line = if current.is_owner(me) {
                "you now hold the lock".to_string()
            } else {
                format!("{} now holds the lock", current.owner)
            };
            self.enforcer.reset();
            self.say(line);
        }

        if current.is_owner(me) {
            let previous = change.previous.as_ref().map_or(&[][..], |r| r.requests.as_slice());
            for requester in current.requests.iter().filter(|r| !previous.contains(r)) {
                self.say(format!(
                    "{requester} requests the lock (accept {requester} / decline {requester})"
                ));
            }
        }
    }

    /// Run until the user leaves or quits.
    ///
    /// Closing the command channel leaves the lock.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (changes_tx, mut changes) = mpsc::channel(16);
        let mut watcher =
            LockWatcher::new(self.env.clone(), self.session.file().clone(), self.config.watcher.clone());
        // Baseline is what `start` already reported.
        watcher.poll_once();
        let watch = tokio::spawn(watcher.run(changes_tx));

        while !self.done {
            tokio::select! {
                Some(change) = changes.recv() => self.handle_change(&change),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        // No more input; leave if we can, stop either way.
                        self.handle_command(Command::Leave);
                        self.done = true;
                    },
                },
            }
        }

        drop(changes);
        watch.abort();
    }

    fn give(&self, raw: &str) -> Result<(), LockError> {
        let Some(target) = self.parse_user(raw) else {
            return Ok(());
        };
        let record = self.session.give(&target)?;
        self.say(format!("{} holds the lock", record.owner));
        Ok(())
    }

    fn answer(&self, requester: Option<String>, accept: bool) -> Result<(), LockError> {
        let requester = match requester {
            Some(raw) => raw,
            None => match self.session.current()?.and_then(|r| r.requests.first().cloned()) {
                Some(oldest) => oldest.to_string(),
                None => {
                    self.say("no pending lock requests");
                    return Ok(());
                },
            },
        };

        if accept {
            return self.give(&requester);
        }

        let Some(requester) = self.parse_user(&requester) else {
            return Ok(());
        };
        self.session.decline(&requester)?;
        self.say(format!("declined {requester}"));
        Ok(())
    }

    fn parse_user(&self, raw: &str) -> Option<Username> {
        match Username::new(raw) {
            Ok(username) => Some(username),
            Err(error) => {
                self.say(format!("error: {error}"));
                None
            },
        }
    }

    fn who(&self) -> Result<(), LockError> {
        match self.session.current()? {
            Some(record) => {
                let users: Vec<&str> = record.users.iter().map(Username::as_str).collect();
                let requests: Vec<&str> = record.requests.iter().map(Username::as_str).collect();
                self.say(format!(
                    "owner: {}, users: {}, requests: {}",
                    record.owner,
                    users.join(", "),
                    if requests.is_empty() { "none".to_string() } else { requests.join(", ") }
                ));
            },
            None => self.say("no lock file"),
        }
        Ok(())
    }

    fn edit(&mut self, document: String) {
        let change = ContentChange { document, origin: None };
        match self.enforcer.check_change(&EnforcementContext::detached(), &change) {
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
        let intent = SaveIntent { document };
        match self.enforcer.check_save(&EnforcementContext::detached(), &intent) {
            SaveVerdict::Allow => self.say(format!("saved {}", intent.document)),
            SaveVerdict::Deny { message } => self.say(message),
        }
    }

    fn say(&self, line: impl Into<String>) {
        if self.output.send(line.into()).is_err() {
            tracing::debug!("console gone, line dropped");
        }
    }
}
