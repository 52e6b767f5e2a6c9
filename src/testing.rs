//! In-memory line client shared by the unit tests

use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

/// Client end of a `tokio::io::duplex` pair, speaking the line protocol
pub(crate) struct LineClient {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl LineClient {
    /// Returns the client and the server end to hand to a session handler
    ///
    /// `buffer` bounds how many unread bytes the server can push before its
    /// writes stall.
    pub(crate) fn pair(buffer: usize) -> (Self, DuplexStream) {
        let (server, client) = tokio::io::duplex(buffer);
        let (reader, writer) = tokio::io::split(client);
        (
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            },
            server,
        )
    }

    pub(crate) async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    pub(crate) async fn next(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
    }

    pub(crate) async fn expect(&mut self, expected: &str) {
        assert_eq!(self.next().await.as_deref(), Some(expected));
    }

    /// Answer the username prompt and wait for the welcome line
    pub(crate) async fn login(&mut self, name: &str) {
        self.expect("*** Enter your username:").await;
        self.send(name).await;
        self.expect(&format!("*** Connected to the server as {}", name))
            .await;
    }
}
