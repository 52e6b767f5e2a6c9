//! Connection wrapper
//!
//! Owns one accepted byte stream. The read half stays with the session
//! handler; the write half is owned by a dedicated writer task fed through a
//! bounded channel, so any task holding a `ConnectionHandle` can send lines.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::ChatError;

/// Cloneable sending side of a connection
///
/// Held by the session registry for routing. Closing any clone closes the
/// connection for every holder.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    peer: Arc<str>,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
    send_timeout: Duration,
}

impl ConnectionHandle {
    /// Queue one line for the writer task
    ///
    /// Fails if the connection is closed or the outbound queue stays full
    /// for longer than the send timeout.
    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), ChatError> {
        if self.closed.is_cancelled() {
            return Err(ChatError::SendFailed("connection closed"));
        }

        match self.outbound.send_timeout(line.into(), self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(ChatError::SendFailed("outbound queue full")),
            Err(SendTimeoutError::Closed(_)) => Err(ChatError::SendFailed("writer stopped")),
        }
    }

    /// Queue one line only if there is room right now
    pub fn try_send_line(&self, line: impl Into<String>) -> Result<(), ChatError> {
        if self.closed.is_cancelled() {
            return Err(ChatError::SendFailed("connection closed"));
        }

        match self.outbound.try_send(line.into()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ChatError::SendFailed("outbound queue full")),
            Err(TrySendError::Closed(_)) => Err(ChatError::SendFailed("writer stopped")),
        }
    }

    /// Close the connection (idempotent)
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Remote address, for logging
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// One accepted connection
pub struct Connection<S> {
    reader: ReadHalf<S>,
    codec: LinesCodec,
    buffer: BytesMut,
    handle: ConnectionHandle,
    writer: Option<JoinHandle<()>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream and spawn its writer task
    pub fn new(stream: S, peer: impl Into<String>, config: &Config) -> Self {
        let peer: Arc<str> = Arc::from(peer.into());
        let (reader, write_half) = tokio::io::split(stream);
        let (outbound, rx) = mpsc::channel(config.outbound_queue);
        let closed = CancellationToken::new();

        let sink = FramedWrite::new(write_half, LinesCodec::new());
        let writer = tokio::spawn(write_loop(
            sink,
            rx,
            closed.clone(),
            peer.clone(),
            config.send_timeout(),
        ));

        Self {
            reader,
            codec: LinesCodec::new_with_max_length(config.max_line_length),
            buffer: BytesMut::with_capacity(1024),
            handle: ConnectionHandle {
                peer,
                outbound,
                closed,
                send_timeout: config.send_timeout(),
            },
            writer: Some(writer),
        }
    }

    /// Wait for the next complete line
    ///
    /// Cancel safe: partially received data stays buffered. An oversized
    /// line yields `LineTooLong` once and is then skipped up to its newline.
    pub async fn receive_line(&mut self) -> Result<String, ChatError> {
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => return Ok(line),
                Ok(None) => {}
                Err(LinesCodecError::MaxLineLengthExceeded) => return Err(ChatError::LineTooLong),
                Err(LinesCodecError::Io(e)) => {
                    debug!("Undecodable input from {}: {}", self.handle.peer, e);
                    return Err(ChatError::ConnectionClosed);
                }
            }

            let read = tokio::select! {
                biased;
                _ = self.handle.closed.cancelled() => return Err(ChatError::ConnectionClosed),
                read = self.reader.read_buf(&mut self.buffer) => read,
            };

            match read {
                Ok(0) => {
                    // Peer hung up; hand out an unterminated last line if any
                    return match self.codec.decode_eof(&mut self.buffer) {
                        Ok(Some(line)) => Ok(line),
                        _ => Err(ChatError::ConnectionClosed),
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Read from {} failed: {}", self.handle.peer, e);
                    return Err(ChatError::ConnectionClosed);
                }
            }
        }
    }

    pub async fn send_line(&self, line: impl Into<String>) -> Result<(), ChatError> {
        self.handle.send_line(line).await
    }

    pub fn try_send_line(&self, line: impl Into<String>) -> Result<(), ChatError> {
        self.handle.try_send_line(line)
    }

    pub fn close(&self) {
        self.handle.close();
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Close and wait until the writer task has released the transport
    pub async fn finish(mut self) {
        self.close();
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
    }
}

/// Writer task: channel → socket
///
/// Lines queued before a close are still flushed, bounded by the send
/// timeout. The write half is dropped exactly once, when this task returns.
async fn write_loop<W>(
    mut sink: FramedWrite<W, LinesCodec>,
    mut rx: mpsc::Receiver<String>,
    closed: CancellationToken,
    peer: Arc<str>,
    send_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = rx.recv() => line,
        };

        // Every handle dropped
        let Some(line) = line else {
            break;
        };

        let result = tokio::select! {
            biased;
            result = sink.send(line) => result,
            _ = closed.cancelled() => break,
        };

        if let Err(e) = result {
            debug!("Write to {} failed: {}", peer, e);
            closed.cancel();
            return;
        }
    }

    rx.close();
    let drain = async {
        while let Ok(line) = rx.try_recv() {
            if sink.feed(line).await.is_err() {
                return;
            }
        }
        let _ = SinkExt::<String>::close(&mut sink).await;
    };
    if tokio::time::timeout(send_timeout, drain).await.is_err() {
        debug!("Flush to {} timed out", peer);
    }

    closed.cancel();
    debug!("Writer task ended for {}", peer);
}
