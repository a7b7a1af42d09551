//! Symmetric lock-file enforcement.

use penholder_core::{
    ContentChange, EnforcementContext, EnforcementStrategy, Judgement, SaveIntent,
};
use penholder_proto::Username;

use crate::store::LockFile;

/// Every peer checks "do I hold the lock?" before permitting its own edits.
///
/// Unlike transport attribution this does not depend on who the change is
/// blamed on: any change seen while the local user does not own the lock is
/// a violation. A lock file that is missing or unreadable means nobody holds
/// the lock.
#[derive(Debug, Clone)]
pub struct LockFileStrategy {
    file: LockFile,
    me: Username,
}

impl LockFileStrategy {
    /// Check `file` on behalf of `me`.
    pub fn new(file: LockFile, me: Username) -> Self {
        Self { file, me }
    }

    fn judge(&self) -> Judgement {
        match self.file.load() {
            Ok(Some(record)) if record.is_owner(&self.me) => Judgement::Permitted,
            Ok(Some(record)) => Judgement::Violation {
                reason: format!("You do not hold the lock; {} does.", record.owner),
            },
            Ok(None) => Judgement::Violation { reason: "Nobody holds the lock.".to_owned() },
            Err(error) => {
                tracing::warn!(%error, "lock file unreadable");
                Judgement::Violation { reason: format!("Lock file unreadable: {error}.") }
            },
        }
    }
}

impl EnforcementStrategy for LockFileStrategy {
    fn name(&self) -> &'static str {
        "lock-file"
    }

    fn judge_change(&mut self, _ctx: &EnforcementContext, _change: &ContentChange) -> Judgement {
        self.judge()
    }

    fn judge_save(&mut self, _ctx: &EnforcementContext, _save: &SaveIntent) -> Judgement {
        self.judge()
    }
}
