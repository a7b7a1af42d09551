//! Polling change watcher for the lock file.

use std::time::Duration;

use penholder_core::Environment;
use tokio::sync::mpsc;

use crate::{record::LockRecord, store::LockFile};

/// Watcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWatcherConfig {
    /// Time between reads of the lock file.
    pub poll_interval: Duration,
}

impl Default for LockWatcherConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(500) }
    }
}

/// Observed change to the lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    /// Record before the change.
    pub previous: Option<LockRecord>,
    /// Record now on disk.
    pub current: Option<LockRecord>,
}

impl LockChange {
    /// Whether the owner differs between the two records.
    pub fn owner_changed(&self) -> bool {
        self.previous.as_ref().map(|r| &r.owner) != self.current.as_ref().map(|r| &r.owner)
    }
}

/// Re-reads the lock file and reports whenever its content changes.
pub struct LockWatcher<E: Environment> {
    env: E,
    file: LockFile,
    config: LockWatcherConfig,
    last: Option<LockRecord>,
}

impl<E: Environment> LockWatcher<E> {
    /// Create a watcher. The first poll reports the current content if any.
    pub fn new(env: E, file: LockFile, config: LockWatcherConfig) -> Self {
        Self { env, file, config, last: None }
    }

    /// Read once and compare with the last observed record.
    pub fn poll_once(&mut self) -> Option<LockChange> {
        let current = match self.file.load() {
            Ok(current) => current,
            Err(error) => {
                tracing::warn!(%error, "lock file poll failed");
                return None;
            },
        };

        if current == self.last {
            return None;
        }

        let previous = std::mem::replace(&mut self.last, current.clone());
        Some(LockChange { previous, current })
    }

    /// Poll until the receiver is dropped.
    pub async fn run(mut self, changes: mpsc::Sender<LockChange>) {
        loop {
            if changes.is_closed() {
                tracing::debug!("lock watcher receiver dropped");
                return;
            }

            if let Some(change) = self.poll_once() {
                if changes.send(change).await.is_err() {
                    tracing::debug!("lock watcher receiver dropped");
                    return;
                }
            }
            self.env.sleep(self.config.poll_interval).await;
        }
    }
}
