//! Peer-blame enforcement from transport change attribution.

use super::{ContentChange, EnforcementContext, EnforcementStrategy, Judgement, SaveIntent};

/// Blames a change on the peer the transport attributed it to.
///
/// Attribution is weak: under concurrency the transport may misattribute or
/// fail to attribute a change. Only a change attributed to the local peer
/// while the local user is not the editor counts as a violation. Unknown and
/// remote origins are let through; each peer polices its own edits.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributionStrategy;

fn not_editor_reason(ctx: &EnforcementContext) -> String {
    match &ctx.editor {
        Some(editor) => format!("You do not have write access; {editor} is the current editor."),
        None => "You do not have write access.".to_owned(),
    }
}

impl EnforcementStrategy for AttributionStrategy {
    fn name(&self) -> &'static str {
        "attribution"
    }

    fn judge_change(&mut self, ctx: &EnforcementContext, change: &ContentChange) -> Judgement {
        if !ctx.in_session() || ctx.local_is_editor() {
            return Judgement::Permitted;
        }

        match (change.origin, ctx.local_peer) {
            (Some(origin), Some(local)) if origin == local => {
                Judgement::Violation { reason: not_editor_reason(ctx) }
            },
            _ => Judgement::Permitted,
        }
    }

    fn judge_save(&mut self, ctx: &EnforcementContext, _save: &SaveIntent) -> Judgement {
        if !ctx.in_session() || ctx.local_is_editor() {
            return Judgement::Permitted;
        }
        Judgement::Violation { reason: not_editor_reason(ctx) }
    }
}
