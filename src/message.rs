//! Message protocol definitions
//!
//! Line-based protocol: every client line is classified into a
//! `ClientCommand`, and everything the server writes is a rendered
//! `Message`.

use chrono::{DateTime, Utc};

use crate::types::{Username, PRIVATE_MARKER};

/// Prefix of every server-generated line
pub const SYSTEM_PREFIX: &str = "***";

/// Line that asks the server to end the session
pub const QUIT_COMMAND: &str = "/quit";

/// Client → Server line, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Leave the chat
    Quit,
    /// `@<to> <body>`
    Private { to: String, body: String },
    /// `@` without a recipient or without a body
    InvalidPrivate,
    /// Any other non-blank line
    Broadcast(String),
    /// Blank line, ignored
    Empty,
}

impl ClientCommand {
    /// Classify one received line
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            return ClientCommand::Empty;
        }

        if line.trim() == QUIT_COMMAND {
            return ClientCommand::Quit;
        }

        if let Some(rest) = line.strip_prefix(PRIVATE_MARKER) {
            // Body is everything after the first whitespace, verbatim
            let Some((to, body)) = rest.split_once(char::is_whitespace) else {
                return ClientCommand::InvalidPrivate;
            };
            if to.is_empty() || body.trim().is_empty() {
                return ClientCommand::InvalidPrivate;
            }
            return ClientCommand::Private {
                to: to.to_string(),
                body: body.to_string(),
            };
        }

        ClientCommand::Broadcast(line.to_string())
    }
}

/// Kind of a routed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Broadcast,
    Private,
    System,
}

/// Server → Client message
///
/// Transient: built by the handler, rendered once per delivery, dropped.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    /// Absent for system messages
    pub sender: Option<Username>,
    /// Present only for private messages
    pub recipient: Option<Username>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn broadcast(sender: Username, body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Broadcast,
            sender: Some(sender),
            recipient: None,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn private(sender: Username, recipient: Username, body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Private,
            sender: Some(sender),
            recipient: Some(recipient),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::System,
            sender: None,
            recipient: None,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    /// Render as one wire line (without the trailing newline)
    pub fn render(&self) -> String {
        match (self.kind, &self.sender) {
            (MessageKind::Broadcast, Some(sender)) => format!("{}: {}", sender, self.body),
            (MessageKind::Private, Some(sender)) => {
                format!("[Private] {}: {}", sender, self.body)
            }
            _ => format!("{} {}", SYSTEM_PREFIX, self.body),
        }
    }
}
