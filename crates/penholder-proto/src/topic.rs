//! Relay topics.
//!
//! Guests cannot multicast. To broadcast on topic `t` a guest sends the
//! payload to the host on `relay:t`; the host unwraps and re-publishes it on
//! `t`. The prefix is reserved: protocol topics never start with it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Prefix marking a guest's request for the host to re-publish a payload.
pub const RELAY_PREFIX: &str = "relay:";

/// Named publish/subscribe channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Join requests, addressed to the host only.
    pub const JOIN: &'static str = "penholder.join";
    /// Join acceptance/rejection and departures.
    pub const MEMBERSHIP: &'static str = "penholder.membership";
    /// Write token transfers.
    pub const TOKEN: &'static str = "penholder.token";
    /// Access requests and declines.
    pub const ACCESS: &'static str = "penholder.access";
    /// Session end.
    pub const LIFECYCLE: &'static str = "penholder.lifecycle";

    /// Every protocol topic a coordinator subscribes to.
    pub const ALL: [&'static str; 5] =
        [Self::JOIN, Self::MEMBERSHIP, Self::TOKEN, Self::ACCESS, Self::LIFECYCLE];

    /// Create a topic from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Topic name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a guest's relay request.
    pub fn is_relay_request(&self) -> bool {
        self.0.starts_with(RELAY_PREFIX)
    }

    /// Wrap this topic into the relay-request topic the host listens on.
    pub fn relay_request(&self) -> Self {
        Self(format!("{RELAY_PREFIX}{}", self.0))
    }

    /// Unwrap a relay request into the topic it should be re-published on.
    ///
    /// Returns `None` for ordinary topics and for an empty inner topic.
    pub fn strip_relay(&self) -> Option<Self> {
        self.0
            .strip_prefix(RELAY_PREFIX)
            .filter(|inner| !inner.is_empty())
            .map(|inner| Self(inner.to_owned()))
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
