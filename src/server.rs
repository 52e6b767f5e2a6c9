//! Server listener
//!
//! Accepts TCP connections and runs one session handler task per
//! connection. Shutdown is cooperative: the cancellation token stops the
//! accept loop and tells every handler to close; handlers still running
//! after the shutdown timeout are force-closed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::handler::{handle_connection, SessionContext};
use crate::registry::Registry;
use crate::router::Router;

/// A bound chat server, ready to run
pub struct ChatServer {
    listener: TcpListener,
    config: Arc<Config>,
}

impl ChatServer {
    /// Bind the listener
    ///
    /// Fails with `Config` if the configuration is invalid and with
    /// `Startup` if the address cannot be bound.
    pub async fn bind(config: Config) -> Result<Self, ChatError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(ChatError::Startup)?;

        info!("Chat server listening on {}", config.bind);

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled, then drain
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ChatError> {
        let ChatServer { listener, config } = self;

        let (registry, registry_task) = Registry::spawn();
        let ctx = SessionContext {
            router: Router::new(registry.clone()),
            config: config.clone(),
            shutdown: shutdown.clone(),
        };
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let ctx = ctx.clone();

                        // Spawn handler task for each connection
                        sessions.spawn(async move {
                            if let Err(e) = handle_connection(stream, addr.to_string(), ctx).await {
                                error!("Session handler error for {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(joined) = sessions.join_next() => report(joined),
            }
        }

        // Stop accepting
        drop(listener);
        info!("Shutting down, waiting for {} sessions", sessions.len());

        drain_sessions(&mut sessions, &registry, config.shutdown_timeout()).await;

        close_all(&registry).await;
        drop(ctx);
        drop(registry);
        if let Err(e) = registry_task.await {
            error!("Registry task failed: {}", e);
        }

        info!("Chat server stopped");
        Ok(())
    }
}

/// Wait for session tasks to finish, force-closing them after `within`
///
/// Returns `true` if the timeout elapsed and sessions had to be aborted.
async fn drain_sessions(sessions: &mut JoinSet<()>, registry: &Registry, within: Duration) -> bool {
    let drained = tokio::time::timeout(within, async {
        while let Some(joined) = sessions.join_next().await {
            report(joined);
        }
    })
    .await;

    if drained.is_ok() {
        return false;
    }

    warn!(
        "Shutdown timeout elapsed, force-closing {} sessions",
        sessions.len()
    );
    close_all(registry).await;
    sessions.abort_all();
    while let Some(joined) = sessions.join_next().await {
        report(joined);
    }
    true
}

/// Remove every registry entry and close its connection
async fn close_all(registry: &Registry) {
    match registry.drain().await {
        Ok(remaining) => {
            for session in remaining {
                debug!("Force-closing '{}'", session.username);
                session.connection.close();
            }
        }
        Err(e) => error!("Failed to drain registry: {}", e),
    }
}

fn report(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Session task panicked: {}", e);
        } else {
            debug!("Session task cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::testing::LineClient;
    use std::time::Instant;

    fn context(config: Config) -> (SessionContext, Registry) {
        let (registry, _) = Registry::spawn();
        let ctx = SessionContext {
            router: Router::new(registry.clone()),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        };
        (ctx, registry)
    }

    fn spawn_session(sessions: &mut JoinSet<()>, ctx: &SessionContext, buffer: usize) -> LineClient {
        let (client, server) = LineClient::pair(buffer);
        let ctx = ctx.clone();
        sessions.spawn(async move {
            let _ = handle_connection(server, "test".to_string(), ctx).await;
        });
        client
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let result = ChatServer::bind(Config {
            bind: "127.0.0.1:0".to_string(),
            outbound_queue: 0,
            ..Config::default()
        })
        .await;

        assert!(matches!(
            result,
            Err(ChatError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn test_drain_returns_when_sessions_finish() {
        let (ctx, registry) = context(Config::default());
        let mut sessions = JoinSet::new();
        let mut alice = spawn_session(&mut sessions, &ctx, 4096);
        alice.login("alice").await;

        ctx.shutdown.cancel();
        let forced = drain_sessions(&mut sessions, &registry, Duration::from_secs(5)).await;

        assert!(!forced);
        assert!(sessions.is_empty());
        alice.expect("*** Server is shutting down").await;
        assert_eq!(alice.next().await, None);
    }

    #[tokio::test]
    async fn test_drain_force_closes_stalled_session() {
        let (ctx, registry) = context(Config {
            outbound_queue: 1,
            send_timeout_ms: 10_000,
            ..Config::default()
        });
        let mut sessions = JoinSet::new();
        let mut slow = spawn_session(&mut sessions, &ctx, 64);
        slow.login("slow").await;

        // slow stops reading; fill its pipe, writer and queue
        let handle = registry.lookup("slow").await.unwrap().connection;
        while handle.try_send_line("x".repeat(40)).is_ok() {
            tokio::task::yield_now().await;
        }

        ctx.shutdown.cancel();
        let started = Instant::now();
        let forced = drain_sessions(&mut sessions, &registry, Duration::from_millis(200)).await;

        assert!(forced);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(sessions.is_empty());
        assert!(handle.is_closed());
        assert_eq!(registry.len().await.unwrap(), 0);
    }
}
