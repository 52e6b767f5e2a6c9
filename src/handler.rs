//! Session handler
//!
//! Drives one connection through `Connecting → Active → Closing → Closed`:
//! username claim, then the receive/classify/route loop, then cleanup.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::{ClientCommand, Message};
use crate::registry::Session;
use crate::router::{DeliveryFailure, Router};
use crate::types::Username;

const USERNAME_PROMPT: &str = "Enter your username:";
const SHUTDOWN_NOTICE: &str = "Server is shutting down";

/// Everything a session handler shares with the rest of the server
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub router: Router,
    pub config: Arc<Config>,
    pub shutdown: CancellationToken,
}

/// Why an active session is closing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Quit,
    Disconnected,
    Shutdown,
}

/// Session lifecycle
#[derive(Debug)]
pub enum SessionState {
    Connecting,
    Active(Session),
    Closing(Session, CloseReason),
    Closed,
}

/// Outcome of one client line while active
enum Flow {
    Continue,
    Quit,
}

/// Handle one accepted connection until it is closed
///
/// Per-session failures end only this session. An error is returned only
/// when the registry is no longer running.
pub async fn handle_connection<S>(
    stream: S,
    peer: String,
    ctx: SessionContext,
) -> Result<(), ChatError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut conn = Connection::new(stream, peer.clone(), &ctx.config);
    let mut state = SessionState::Connecting;
    let mut outcome = Ok(());

    debug!("Session started for {}", peer);

    loop {
        state = match state {
            SessionState::Connecting => match claim_username(&mut conn, &ctx).await {
                Ok(next) => next,
                Err(e) => {
                    debug!("Connection from {} ended before joining: {}", peer, e);
                    if matches!(e, ChatError::RegistryClosed) {
                        outcome = Err(e);
                    }
                    SessionState::Closed
                }
            },
            SessionState::Active(session) => run_active(&mut conn, &ctx, session).await,
            SessionState::Closing(session, reason) => {
                if let Err(e) = close_session(&conn, &ctx, &session, reason).await {
                    outcome = Err(e);
                }
                SessionState::Closed
            }
            SessionState::Closed => break,
        };
    }

    conn.finish().await;
    debug!("Session ended for {}", peer);

    outcome
}

/// `Connecting`: prompt for a username until one is claimed
async fn claim_username<S>(
    conn: &mut Connection<S>,
    ctx: &SessionContext,
) -> Result<SessionState, ChatError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    for attempt in 1..=ctx.config.max_name_attempts {
        conn.send_line(system_line(USERNAME_PROMPT)).await?;

        let line = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Ok(SessionState::Closed),
            line = conn.receive_line() => line,
        };

        let result = match line {
            Ok(line) => match Username::parse(&line, ctx.config.max_username_length) {
                Ok(username) => ctx.router.registry().claim(username, conn.handle()).await,
                Err(e) => Err(e),
            },
            Err(ChatError::LineTooLong) => Err(ChatError::InvalidUsername(
                "line too long".to_string(),
            )),
            Err(e) => return Err(e),
        };

        match result {
            Ok(session) => return Ok(join(conn, ctx, session).await),
            Err(e @ (ChatError::NameTaken(_) | ChatError::InvalidUsername(_))) => {
                info!(
                    "Username rejected for {} (attempt {}/{}): {}",
                    conn.handle().peer(),
                    attempt,
                    ctx.config.max_name_attempts,
                    e
                );
                conn.send_line(system_line(e.to_string())).await?;
            }
            Err(e) => return Err(e),
        }
    }

    conn.send_line(system_line("Too many attempts, closing connection"))
        .await?;
    Ok(SessionState::Closed)
}

/// Welcome a freshly claimed session and announce it to everyone else
async fn join<S>(conn: &Connection<S>, ctx: &SessionContext, session: Session) -> SessionState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    info!(
        "'{}' joined from {}",
        session.username,
        session.connection.peer()
    );

    let welcome = format!("Connected to the server as {}", session.username);
    if conn.send_line(system_line(welcome)).await.is_err() {
        return SessionState::Closing(session, CloseReason::Disconnected);
    }

    let notice = format!("{} has joined the chat!", session.username);
    match ctx.router.system_notify(&notice, Some(&session.username)).await {
        Ok(failures) => log_failures(&failures),
        Err(e) => warn!("Join notice for '{}' failed: {}", session.username, e),
    }

    SessionState::Active(session)
}

/// `Active`: receive, classify, route
async fn run_active<S>(
    conn: &mut Connection<S>,
    ctx: &SessionContext,
    session: Session,
) -> SessionState
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let line = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                let _ = conn.try_send_line(system_line(SHUTDOWN_NOTICE));
                return SessionState::Closing(session, CloseReason::Shutdown);
            }
            line = conn.receive_line() => line,
        };

        let result = match line {
            Ok(line) => dispatch(conn, ctx, &session, &line).await,
            Err(ChatError::LineTooLong) => conn
                .send_line(system_line("Line too long"))
                .await
                .map(|_| Flow::Continue),
            Err(e) => Err(e),
        };

        match result {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return SessionState::Closing(session, CloseReason::Quit),
            Err(e) => {
                debug!("Session '{}' ending: {}", session.username, e);
                return SessionState::Closing(session, CloseReason::Disconnected);
            }
        }
    }
}

/// Act on one client line
///
/// Errors returned here concern the sender's own connection or the
/// registry; routing errors are reported to the sender in place.
async fn dispatch<S>(
    conn: &Connection<S>,
    ctx: &SessionContext,
    session: &Session,
    line: &str,
) -> Result<Flow, ChatError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let sender = &session.username;

    match ClientCommand::parse(line) {
        ClientCommand::Quit => return Ok(Flow::Quit),
        ClientCommand::Empty => {}
        ClientCommand::InvalidPrivate => {
            conn.send_line(system_line("Invalid private message format."))
                .await?;
        }
        ClientCommand::Private { to, body } => {
            let reply = match ctx.router.send_private(sender, &to, &body).await {
                Ok(()) => format!("[Private message has been sent to {}]", to),
                Err(ChatError::NoSuchUser(_)) => format!("User '{}' not found.", to),
                Err(ChatError::RegistryClosed) => return Err(ChatError::RegistryClosed),
                Err(e) => {
                    debug!("Private message {} -> {} failed: {}", sender, to, e);
                    format!("Failed to send private message to {}", to)
                }
            };
            conn.send_line(system_line(reply)).await?;
        }
        ClientCommand::Broadcast(body) => {
            debug!("Broadcast from '{}': {} bytes", sender, body.len());
            let failures = ctx.router.broadcast(sender, &body).await?;
            log_failures(&failures);
        }
    }

    Ok(Flow::Continue)
}

/// `Closing`: deregister, announce, close
async fn close_session<S>(
    conn: &Connection<S>,
    ctx: &SessionContext,
    session: &Session,
    reason: CloseReason,
) -> Result<(), ChatError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    info!("'{}' leaving ({:?})", session.username, reason);

    let registry = ctx.router.registry();
    let result = match registry
        .release_session(session.username.as_str(), session.id)
        .await
    {
        Ok(_) => {
            let notice = format!("{} has left the chat.", session.username);
            match ctx.router.system_notify(&notice, Some(&session.username)).await {
                Ok(failures) => {
                    log_failures(&failures);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Err(e) => {
            error!("Failed to release '{}': {}", session.username, e);
            Err(e)
        }
    };

    conn.close();
    result
}

fn system_line(body: impl Into<String>) -> String {
    Message::system(body).render()
}

fn log_failures(failures: &[DeliveryFailure]) {
    for failure in failures {
        warn!("Delivery to '{}' failed: {}", failure.username, failure.error);
    }
}
