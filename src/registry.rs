//! Session registry actor
//!
//! The registry owns the username → session map. It runs as a single actor
//! task; `Registry` handles talk to it over an mpsc channel and wait for the
//! answer on a oneshot, so every operation is atomic with respect to every
//! other one and the map itself is never shared.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connection::ConnectionHandle;
use crate::error::ChatError;
use crate::types::{SessionId, Username};

/// Channel buffer size for registry commands
const COMMAND_BUFFER_SIZE: usize = 256;

/// An active session as seen by the registry
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub username: Username,
    pub connection: ConnectionHandle,
    pub joined_at: DateTime<Utc>,
}

impl Session {
    pub fn is_live(&self) -> bool {
        !self.connection.is_closed()
    }
}

/// Commands sent from handles to the registry actor
#[derive(Debug)]
enum RegistryCommand {
    Claim {
        username: Username,
        connection: ConnectionHandle,
        reply: oneshot::Sender<Result<Session, ChatError>>,
    },
    Release {
        username: String,
        reply: oneshot::Sender<bool>,
    },
    ReleaseSession {
        username: String,
        id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Lookup {
        username: String,
        reply: oneshot::Sender<Option<Session>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Session>>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
    Drain {
        reply: oneshot::Sender<Vec<Session>>,
    },
}

/// Handle to the registry actor
///
/// Cheap to clone. The actor stops once every handle is dropped.
#[derive(Debug, Clone)]
pub struct Registry {
    sender: mpsc::Sender<RegistryCommand>,
}

impl Registry {
    /// Start an empty registry actor
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let actor = RegistryActor {
            sessions: BTreeMap::new(),
            receiver,
        };
        (Self { sender }, tokio::spawn(actor.run()))
    }

    /// Claim a username for a connection
    ///
    /// Exactly one of several concurrent claims of the same name succeeds;
    /// the rest fail with `NameTaken`.
    pub async fn claim(
        &self,
        username: Username,
        connection: ConnectionHandle,
    ) -> Result<Session, ChatError> {
        self.request(|reply| RegistryCommand::Claim {
            username,
            connection,
            reply,
        })
        .await?
    }

    /// Remove a username if present; returns whether an entry was removed
    pub async fn release(&self, username: &str) -> Result<bool, ChatError> {
        self.request(|reply| RegistryCommand::Release {
            username: username.to_string(),
            reply,
        })
        .await
    }

    /// Remove a username only if it still belongs to session `id`
    pub async fn release_session(&self, username: &str, id: SessionId) -> Result<bool, ChatError> {
        self.request(|reply| RegistryCommand::ReleaseSession {
            username: username.to_string(),
            id,
            reply,
        })
        .await
    }

    pub async fn lookup(&self, username: &str) -> Result<Session, ChatError> {
        self.request(|reply| RegistryCommand::Lookup {
            username: username.to_string(),
            reply,
        })
        .await?
        .ok_or_else(|| ChatError::NoSuchUser(username.to_string()))
    }

    /// Copy of all sessions at one instant, ordered by username
    pub async fn snapshot(&self) -> Result<Vec<Session>, ChatError> {
        self.request(|reply| RegistryCommand::Snapshot { reply }).await
    }

    pub async fn len(&self) -> Result<usize, ChatError> {
        self.request(|reply| RegistryCommand::Len { reply }).await
    }

    /// Remove and return every session
    pub async fn drain(&self) -> Result<Vec<Session>, ChatError> {
        self.request(|reply| RegistryCommand::Drain { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, ChatError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(command(reply))
            .await
            .map_err(|_| ChatError::RegistryClosed)?;
        response.await.map_err(|_| ChatError::RegistryClosed)
    }
}

/// The registry actor
///
/// Sole owner of the session map; processes commands one at a time.
struct RegistryActor {
    sessions: BTreeMap<Username, Session>,
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl RegistryActor {
    /// Run the event loop until all handles are dropped
    async fn run(mut self) {
        debug!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!("Registry stopped with {} sessions", self.sessions.len());
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Claim {
                username,
                connection,
                reply,
            } => {
                let _ = reply.send(self.handle_claim(username, connection));
            }
            RegistryCommand::Release { username, reply } => {
                let removed = self.sessions.remove(username.as_str()).is_some();
                if removed {
                    info!("Released username '{}'", username);
                }
                let _ = reply.send(removed);
            }
            RegistryCommand::ReleaseSession {
                username,
                id,
                reply,
            } => {
                let _ = reply.send(self.handle_release_session(&username, id));
            }
            RegistryCommand::Lookup { username, reply } => {
                let _ = reply.send(self.sessions.get(username.as_str()).cloned());
            }
            RegistryCommand::Snapshot { reply } => {
                let _ = reply.send(self.sessions.values().cloned().collect());
            }
            RegistryCommand::Len { reply } => {
                let _ = reply.send(self.sessions.len());
            }
            RegistryCommand::Drain { reply } => {
                let drained = std::mem::take(&mut self.sessions);
                debug!("Registry drained {} sessions", drained.len());
                let _ = reply.send(drained.into_values().collect());
            }
        }
    }

    fn handle_claim(
        &mut self,
        username: Username,
        connection: ConnectionHandle,
    ) -> Result<Session, ChatError> {
        if let Some(existing) = self.sessions.get(&username) {
            if existing.is_live() {
                return Err(ChatError::NameTaken(username.to_string()));
            }
            debug!(
                "Replacing closed session {} for '{}'",
                existing.id, username
            );
        }

        let session = Session {
            id: SessionId::new(),
            username: username.clone(),
            connection,
            joined_at: Utc::now(),
        };
        self.sessions.insert(username.clone(), session.clone());

        info!("Session {} claimed username '{}'", session.id, username);
        debug!("Total sessions: {}", self.sessions.len());

        Ok(session)
    }

    fn handle_release_session(&mut self, username: &str, id: SessionId) -> bool {
        match self.sessions.get(username) {
            Some(session) if session.id == id => {
                self.sessions.remove(username);
                info!("Session {} released username '{}'", id, username);
                debug!("Total sessions: {}", self.sessions.len());
                true
            }
            _ => false,
        }
    }
}
