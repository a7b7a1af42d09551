//! Per-document warning rate limit.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Suppresses repeated violation warnings for the same document.
///
/// A burst of keystrokes from a non-editor produces one warning per
/// `interval`, not one per change. Time is supplied by the caller so the
/// throttle works under a simulated clock.
#[derive(Debug)]
pub struct WarningThrottle {
    interval: Duration,
    last_warned: HashMap<String, Instant>,
}

impl WarningThrottle {
    /// Throttle with the given minimum spacing between warnings.
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_warned: HashMap::new() }
    }

    /// Minimum spacing between warnings for one document.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true if a warning for `document` may be shown at `now`, and
    /// records it as shown.
    pub fn should_warn(&mut self, document: &str, now: Instant) -> bool {
        if let Some(last) = self.last_warned.get(document) {
            if now.saturating_duration_since(*last) < self.interval {
                return false;
            }
        }
        self.last_warned.insert(document.to_owned(), now);
        true
    }

    /// Forget all history, e.g. when the session changes.
    pub fn reset(&mut self) {
        self.last_warned.clear();
    }
}
