//! Integration tests for the chat server over real TCP connections.
//!
//! Each test binds a server on an ephemeral port, drives it with plain
//! line clients and shuts it down through the cancellation token.

use std::net::SocketAddr;
use std::time::Duration;

use chat_server::{ChatError, ChatServer, Config};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const LINE_TIMEOUT: Duration = Duration::from_secs(3);

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), ChatError>>,
}

impl TestServer {
    async fn spawn(config: Config) -> Self {
        let server = ChatServer::bind(Config {
            bind: "127.0.0.1:0".to_string(),
            ..config
        })
        .await
        .expect("Failed to bind test server");
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        Self {
            addr,
            shutdown,
            task,
        }
    }

    async fn stop(self, within: Duration) {
        self.shutdown.cancel();
        tokio::time::timeout(within, self.task)
            .await
            .expect("server did not stop in time")
            .unwrap()
            .unwrap();
    }
}

struct TestClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.expect("*** Enter your username:").await;
        client.send(name).await;
        client
            .expect(&format!("*** Connected to the server as {}", name))
            .await;
        client
    }

    async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn next(&mut self) -> Option<String> {
        tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap_or(None)
    }

    async fn expect(&mut self, expected: &str) {
        assert_eq!(self.next().await.as_deref(), Some(expected));
    }

    async fn assert_silent(&mut self) {
        let result = tokio::time::timeout(Duration::from_millis(100), self.lines.next_line()).await;
        assert!(result.is_err(), "unexpected line: {:?}", result);
    }

    /// Read until the server closes the connection
    async fn read_to_end(&mut self) -> Vec<String> {
        let mut received = Vec::new();
        while let Some(line) = self.next().await {
            received.push(line);
        }
        received
    }
}

#[tokio::test]
async fn test_private_message_reaches_only_recipient() {
    let server = TestServer::spawn(Config::default()).await;

    let mut alice = TestClient::login(server.addr, "alice").await;
    let mut bob = TestClient::login(server.addr, "bob").await;
    alice.expect("*** bob has joined the chat!").await;
    let mut carol = TestClient::login(server.addr, "carol").await;
    alice.expect("*** carol has joined the chat!").await;
    bob.expect("*** carol has joined the chat!").await;

    alice.send("@bob hello").await;
    bob.expect("[Private] alice: hello").await;
    alice.expect("*** [Private message has been sent to bob]").await;
    carol.assert_silent().await;

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_broadcast_reaches_everyone_but_sender() {
    let server = TestServer::spawn(Config::default()).await;

    let mut alice = TestClient::login(server.addr, "alice").await;
    let mut others = Vec::new();
    for name in ["bob", "carol", "dave"] {
        others.push(TestClient::login(server.addr, name).await);
    }
    for _ in 0..3 {
        assert!(alice.next().await.unwrap().ends_with("has joined the chat!"));
    }
    // Drain join notices among the others
    for (i, other) in others.iter_mut().enumerate() {
        for _ in 0..(2 - i) {
            assert!(other.next().await.unwrap().ends_with("has joined the chat!"));
        }
    }

    alice.send("hello everyone").await;
    for other in &mut others {
        other.expect("alice: hello everyone").await;
    }
    alice.assert_silent().await;

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_duplicate_username_leaves_first_session_intact() {
    let server = TestServer::spawn(Config::default()).await;

    let mut alice = TestClient::login(server.addr, "alice").await;
    let mut impostor = TestClient::connect(server.addr).await;
    impostor.expect("*** Enter your username:").await;
    impostor.send("alice").await;
    impostor.expect("*** Username 'alice' is already taken").await;
    impostor.expect("*** Enter your username:").await;

    impostor.send("mallory").await;
    impostor.expect("*** Connected to the server as mallory").await;
    alice.expect("*** mallory has joined the chat!").await;

    impostor.send("hi").await;
    alice.expect("mallory: hi").await;

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_username_reusable_after_quit() {
    let server = TestServer::spawn(Config::default()).await;

    let mut alice = TestClient::login(server.addr, "alice").await;
    alice.send("/quit").await;
    assert!(alice.read_to_end().await.is_empty());

    let mut again = TestClient::login(server.addr, "alice").await;
    again.assert_silent().await;

    server.stop(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_shutdown_closes_active_sessions() {
    let server = TestServer::spawn(Config {
        shutdown_timeout_ms: 2_000,
        ..Config::default()
    })
    .await;

    let mut clients = Vec::new();
    for name in ["alice", "bob", "carol"] {
        clients.push(TestClient::login(server.addr, name).await);
    }

    server.stop(Duration::from_secs(5)).await;

    for client in &mut clients {
        let received = client.read_to_end().await;
        assert!(
            received.iter().any(|l| l == "*** Server is shutting down"),
            "missing shutdown notice in {:?}",
            received
        );
    }
}

#[tokio::test]
async fn test_shutdown_closes_connection_still_choosing_name() {
    let server = TestServer::spawn(Config {
        shutdown_timeout_ms: 200,
        ..Config::default()
    })
    .await;

    // Connected but never sends a username
    let mut idle = TestClient::connect(server.addr).await;
    idle.expect("*** Enter your username:").await;
    let _alice = TestClient::login(server.addr, "alice").await;

    server.stop(Duration::from_secs(3)).await;
    idle.read_to_end().await;
}

#[tokio::test]
async fn test_remains_responsive_with_many_clients() {
    const CLIENTS: usize = 50;
    let server = TestServer::spawn(Config::default()).await;

    let mut clients = Vec::new();
    for i in 0..CLIENTS {
        let mut client = TestClient::connect(server.addr).await;
        client.expect("*** Enter your username:").await;
        client.send(&format!("user{}", i)).await;
        client
            .expect(&format!("*** Connected to the server as user{}", i))
            .await;
        clients.push(client);
    }

    let mut late = TestClient::login(server.addr, "late").await;
    late.send("@user0 ping").await;
    late.expect("*** [Private message has been sent to user0]").await;

    let user0 = &mut clients[0];
    loop {
        let line = user0.next().await.expect("connection closed");
        if line == "[Private] late: ping" {
            break;
        }
        assert!(line.ends_with("has joined the chat!"), "unexpected {}", line);
    }

    server.stop(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn test_bind_failure_is_startup_error() {
    let first = ChatServer::bind(Config {
        bind: "127.0.0.1:0".to_string(),
        ..Config::default()
    })
    .await
    .unwrap();
    let addr = first.local_addr().unwrap();

    let result = ChatServer::bind(Config {
        bind: addr.to_string(),
        ..Config::default()
    })
    .await;

    assert!(matches!(result, Err(ChatError::Startup(_))));
}
