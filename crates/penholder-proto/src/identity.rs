//! Peer and user identities.
//!
//! A [`PeerId`] is assigned by the transport and is stable for as long as the
//! peer stays connected. A [`Username`] is picked by the human at join time and
//! must be unique within a session. The two are deliberately distinct types:
//! change notifications arrive tagged with a `PeerId` and must be resolved to a
//! `Username` through the session's attribution map.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a username, in characters.
pub const MAX_USERNAME_LEN: usize = 32;

/// Session-scoped peer identifier assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    /// Identifier the host transport assigns to itself.
    pub const HOST: Self = Self(0);

    /// Wrap a raw transport identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw transport identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Reasons a display name is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    /// Name is empty after trimming whitespace.
    #[error("username is empty")]
    Empty,

    /// Name exceeds [`MAX_USERNAME_LEN`].
    #[error("username is {len} characters, maximum is {max}")]
    TooLong {
        /// Character count of the rejected name.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// Name contains a control character.
    #[error("username contains a control character")]
    ControlCharacter,
}

/// Human-chosen display name, unique within a session.
///
/// Surrounding whitespace is trimmed on construction. Deserialization runs the
/// same validation, so a malformed name on the wire fails to decode instead of
/// entering the replicated state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Validate and wrap a display name.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, UsernameError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(UsernameError::Empty);
        }

        let len = trimmed.chars().count();
        if len > MAX_USERNAME_LEN {
            return Err(UsernameError::TooLong { len, max: MAX_USERNAME_LEN });
        }

        if trimmed.chars().any(char::is_control) {
            return Err(UsernameError::ControlCharacter);
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = UsernameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Username> for String {
    fn from(value: Username) -> Self {
        value.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
