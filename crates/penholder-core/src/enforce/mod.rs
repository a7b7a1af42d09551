//! Violation detection and enforcement.
//!
//! The editing surface reports every content change and every save intent.
//! An [`EnforcementStrategy`] decides whether the change breaks the
//! single-writer rule; the [`Enforcer`] turns that judgement into a
//! [`Verdict`] with a rate-limited warning and an optional revert.
//!
//! Enforcement is advisory. A violating edit has already happened by the time
//! it is reported; the best the enforcer can do is warn, undo it locally and
//! refuse to save.

mod attribution;
mod throttle;

use std::time::Duration;

pub use attribution::AttributionStrategy;
use penholder_proto::{PeerId, Username};
pub use throttle::WarningThrottle;

use crate::env::Environment;

/// A change reported by the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    /// Document that changed.
    pub document: String,
    /// Peer the transport attributed the change to, if it could.
    pub origin: Option<PeerId>,
}

/// The local user is about to save a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveIntent {
    /// Document being saved.
    pub document: String,
}

/// What the local peer knows about the session when judging a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementContext {
    /// Local transport identity, if a transport is attached.
    pub local_peer: Option<PeerId>,
    /// Local display name, if in a session.
    pub local_user: Option<Username>,
    /// Current editor, if in a session.
    pub editor: Option<Username>,
}

impl EnforcementContext {
    /// Context outside of any session. Nothing is enforced.
    pub fn detached() -> Self {
        Self { local_peer: None, local_user: None, editor: None }
    }

    /// Whether the local user currently holds the write token.
    pub fn local_is_editor(&self) -> bool {
        matches!((&self.local_user, &self.editor), (Some(me), Some(editor)) if me == editor)
    }

    /// Whether a session is active.
    pub fn in_session(&self) -> bool {
        self.local_user.is_some() && self.editor.is_some()
    }
}

/// A strategy's ruling on one change or save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Judgement {
    /// Nothing wrong.
    Permitted,
    /// The single-writer rule was broken.
    Violation {
        /// Human-readable explanation.
        reason: String,
    },
}

/// Decides whether a change or save breaks the single-writer rule.
pub trait EnforcementStrategy {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Judge a content change.
    fn judge_change(&mut self, ctx: &EnforcementContext, change: &ContentChange) -> Judgement;

    /// Judge a save intent.
    fn judge_save(&mut self, ctx: &EnforcementContext, save: &SaveIntent) -> Judgement;
}

/// Enforcer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementConfig {
    /// Undo violating changes locally.
    pub revert_on_violation: bool,
    /// Minimum spacing between warnings for one document.
    pub warning_interval: Duration,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self { revert_on_violation: true, warning_interval: Duration::from_secs(2) }
    }
}

/// Outcome of checking a content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the change.
    Allow,
    /// The change violated the single-writer rule.
    Violation {
        /// Affected document.
        document: String,
        /// Warning to show, unless throttled.
        warning: Option<String>,
        /// Whether the editing surface should undo the change.
        revert: bool,
    },
}

/// Outcome of checking a save intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveVerdict {
    /// Let the save proceed.
    Allow,
    /// Veto the save.
    Deny {
        /// Explanation for the user. Never throttled.
        message: String,
    },
}

/// Applies an [`EnforcementStrategy`] with warning throttling.
pub struct Enforcer<E: Environment, S: EnforcementStrategy> {
    env: E,
    strategy: S,
    throttle: WarningThrottle,
    config: EnforcementConfig,
}

impl<E: Environment, S: EnforcementStrategy> Enforcer<E, S> {
    /// Create an enforcer.
    pub fn new(env: E, strategy: S, config: EnforcementConfig) -> Self {
        let throttle = WarningThrottle::new(config.warning_interval);
        Self { env, strategy, throttle, config }
    }

    /// Strategy in use.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Mutable access to the strategy.
    pub fn strategy_mut(&mut self) -> &mut S {
        &mut self.strategy
    }

    /// Check a content change.
    pub fn check_change(&mut self, ctx: &EnforcementContext, change: &ContentChange) -> Verdict {
        match self.strategy.judge_change(ctx, change) {
            Judgement::Permitted => Verdict::Allow,
            Judgement::Violation { reason } => {
                tracing::warn!(
                    strategy = self.strategy.name(),
                    document = %change.document,
                    %reason,
                    "write violation"
                );

                let warning = self
                    .throttle
                    .should_warn(&change.document, self.env.now())
                    .then_some(reason);

                Verdict::Violation {
                    document: change.document.clone(),
                    warning,
                    revert: self.config.revert_on_violation,
                }
            },
        }
    }

    /// Check a save intent.
    pub fn check_save(&mut self, ctx: &EnforcementContext, save: &SaveIntent) -> SaveVerdict {
        match self.strategy.judge_save(ctx, save) {
            Judgement::Permitted => SaveVerdict::Allow,
            Judgement::Violation { reason } => {
                tracing::warn!(strategy = self.strategy.name(), document = %save.document, "save vetoed");
                SaveVerdict::Deny { message: format!("{reason} Changes to {} were not saved.", save.document) }
            },
        }
    }

    /// Forget warning history, e.g. after the session changes.
    pub fn reset(&mut self) {
        self.throttle.reset();
    }
}
