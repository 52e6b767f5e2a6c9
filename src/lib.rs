//! Line Chat Server Library
//!
//! A TCP chat server speaking a plain line protocol, built on tokio.
//!
//! # Features
//! - Unique username claiming, with retries
//! - Broadcast to every other user
//! - Private messages with `@<username> <message>`
//! - Join/leave notices
//! - `/quit` and disconnect handling
//! - Graceful shutdown with a bounded drain timeout
//!
//! # Architecture
//! - `Registry` is an actor owning the username → session map
//! - `Router` resolves recipients through the registry and delivers lines
//! - Each connection has a `handler` task plus a writer task
//! - `ChatServer` accepts connections and coordinates shutdown
//!
//! # Example
//! ```ignore
//! use chat_server::{ChatServer, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(Config::default()).await.unwrap();
//!     let shutdown = CancellationToken::new();
//!     server.run(shutdown).await.unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use config::Config;
pub use connection::{Connection, ConnectionHandle};
pub use error::{ChatError, ConfigError};
pub use handler::{handle_connection, SessionContext};
pub use message::{ClientCommand, Message, MessageKind};
pub use registry::{Registry, Session};
pub use router::{DeliveryFailure, Router};
pub use server::ChatServer;
pub use types::{SessionId, Username};
