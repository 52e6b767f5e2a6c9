//! Error types for the chat server
//!
//! Defines session-level chat errors and configuration errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Chat errors
///
/// Covers both fatal errors (session termination) and
/// business errors (reported to the client as a system line).
#[derive(Debug, Error)]
pub enum ChatError {
    /// Username is already claimed by an active session
    #[error("Username '{0}' is already taken")]
    NameTaken(String),

    /// No active session with the given username
    #[error("User '{0}' not found")]
    NoSuchUser(String),

    /// Username failed validation
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Peer disconnected, socket failed or the connection was closed (fatal)
    #[error("Connection closed")]
    ConnectionClosed,

    /// Line could not be handed to the connection's writer (fatal)
    #[error("Send failed: {0}")]
    SendFailed(&'static str),

    /// Incoming line exceeded the configured maximum length
    #[error("Line too long")]
    LineTooLong,

    /// The registry actor has stopped
    #[error("Registry closed")]
    RegistryClosed,

    /// Configuration rejected before binding (process-fatal)
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Listener could not be bound (process-fatal)
    #[error("Startup failure: {0}")]
    Startup(#[source] std::io::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error ends the session that observed it
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            ChatError::ConnectionClosed
                | ChatError::SendFailed(_)
                | ChatError::RegistryClosed
                | ChatError::Io(_)
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for `Config`
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}
