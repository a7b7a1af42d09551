//! On-disk lock record.

use std::collections::BTreeSet;

use penholder_proto::Username;
use serde::{Deserialize, Serialize};

/// Contents of the shared lock file.
///
/// ```json
/// { "owner": "alice", "users": ["alice", "bob"], "requests": ["bob"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Current write-token holder.
    pub owner: Username,
    /// Everyone who has joined.
    #[serde(default)]
    pub users: BTreeSet<Username>,
    /// Outstanding access requests, oldest first.
    #[serde(default)]
    pub requests: Vec<Username>,
}

impl LockRecord {
    /// Record created by the first user to join.
    pub fn founded_by(owner: Username) -> Self {
        Self { users: BTreeSet::from([owner.clone()]), owner, requests: Vec::new() }
    }

    /// Structural check: owner and requesters must be members.
    pub fn validate(&self) -> Result<(), String> {
        if !self.users.contains(&self.owner) {
            return Err(format!("owner {} is not a user", self.owner));
        }
        if let Some(stranger) = self.requests.iter().find(|r| !self.users.contains(*r)) {
            return Err(format!("requester {stranger} is not a user"));
        }
        Ok(())
    }

    /// Whether `username` holds the lock.
    pub fn is_owner(&self, username: &Username) -> bool {
        self.owner == *username
    }

    /// Queue a request once.
    pub(crate) fn push_request(&mut self, username: &Username) {
        if !self.requests.contains(username) {
            self.requests.push(username.clone());
        }
    }

    /// Drop a pending request.
    pub(crate) fn drop_request(&mut self, username: &Username) {
        self.requests.retain(|r| r != username);
    }
}
