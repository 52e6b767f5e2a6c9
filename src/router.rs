//! Message router
//!
//! Resolves recipients through the registry and delivers rendered messages
//! to their connections. Delivery is best-effort: every recipient is tried
//! independently and failures are collected for the caller to log.
//! A recipient whose connection rejects a line is deregistered and closed.

use futures_util::future::join_all;
use tracing::debug;

use crate::error::ChatError;
use crate::message::Message;
use crate::registry::{Registry, Session};
use crate::types::Username;

/// One recipient that could not be reached
#[derive(Debug)]
pub struct DeliveryFailure {
    pub username: Username,
    pub error: ChatError,
}

/// Routes messages between sessions
#[derive(Debug, Clone)]
pub struct Router {
    registry: Registry,
}

impl Router {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Deliver a chat line to every session except the sender
    pub async fn broadcast(
        &self,
        sender: &Username,
        body: &str,
    ) -> Result<Vec<DeliveryFailure>, ChatError> {
        let message = Message::broadcast(sender.clone(), body);
        self.fan_out(&message, Some(sender)).await
    }

    /// Deliver a chat line to exactly one named session
    pub async fn send_private(
        &self,
        sender: &Username,
        recipient: &str,
        body: &str,
    ) -> Result<(), ChatError> {
        let target = self.registry.lookup(recipient).await?;
        let message = Message::private(sender.clone(), target.username.clone(), body);

        debug!("Private message {} -> {}", sender, target.username);
        self.deliver(&target, &message.render()).await
    }

    /// Deliver a system notice to every session except `exclude`
    pub async fn system_notify(
        &self,
        body: &str,
        exclude: Option<&Username>,
    ) -> Result<Vec<DeliveryFailure>, ChatError> {
        self.fan_out(&Message::system(body), exclude).await
    }

    async fn fan_out(
        &self,
        message: &Message,
        exclude: Option<&Username>,
    ) -> Result<Vec<DeliveryFailure>, ChatError> {
        let line = message.render();
        let targets: Vec<Session> = self
            .registry
            .snapshot()
            .await?
            .into_iter()
            .filter(|s| Some(&s.username) != exclude)
            .collect();

        debug!("Delivering {:?} message to {} sessions", message.kind, targets.len());

        let results = join_all(targets.iter().map(|s| self.deliver(s, &line))).await;

        Ok(targets
            .into_iter()
            .zip(results)
            .filter_map(|(session, result)| {
                result.err().map(|error| DeliveryFailure {
                    username: session.username,
                    error,
                })
            })
            .collect())
    }

    async fn deliver(&self, target: &Session, line: &str) -> Result<(), ChatError> {
        let result = target.connection.send_line(line).await;
        if let Err(e) = &result {
            debug!("Delivery to '{}' failed: {}", target.username, e);
            self.evict(target).await;
        }
        result
    }

    /// Drop a session whose connection no longer accepts lines
    async fn evict(&self, target: &Session) {
        target.connection.close();
        if let Ok(true) = self
            .registry
            .release_session(target.username.as_str(), target.id)
            .await
        {
            debug!("Evicted '{}' after failed send", target.username);
        }
    }
}
