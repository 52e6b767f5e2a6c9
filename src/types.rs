//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `SessionId`: UUID-based identifier of one session instance
//! - `Username`: validated, case-sensitive user name

use std::borrow::Borrow;

use uuid::Uuid;

use crate::error::ChatError;

/// Marker that starts a private message line (`@bob hello`)
pub const PRIVATE_MARKER: char = '@';

/// Marker that starts a client command line (`/quit`)
pub const COMMAND_MARKER: char = '/';

/// Unique session identifier (newtype pattern)
///
/// A username can be claimed again after its session ends, so the registry
/// tags every entry with the id of the session that claimed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A claimed user name
///
/// Case-sensitive. Never empty, never contains whitespace and never starts
/// with the private or command marker, so a line like `@name body` always
/// splits unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// Validate raw client input as a username
    ///
    /// Surrounding whitespace is trimmed before validation.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, ChatError> {
        let name = raw.trim();

        let reason = if name.is_empty() {
            Some("must not be empty".to_string())
        } else if name.chars().count() > max_len {
            Some(format!("must be at most {} characters", max_len))
        } else if name.chars().any(char::is_whitespace) {
            Some("must not contain spaces".to_string())
        } else if name.starts_with(PRIVATE_MARKER) || name.starts_with(COMMAND_MARKER) {
            Some(format!(
                "must not start with '{}' or '{}'",
                PRIVATE_MARKER, COMMAND_MARKER
            ))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ChatError::InvalidUsername(reason)),
            None => Ok(Self(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
