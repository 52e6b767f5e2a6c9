//! Line Chat Server - Entry Point
//!
//! Usage: `chat_server [ADDR] [CONFIG]`
//!
//! `ADDR` overrides the `bind` setting of the optional TOML config file.

use std::env;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_server::{ChatServer, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_server=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_server=info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let addr = args.next();
    let config_path = args.next();

    let mut config = match config_path {
        Some(path) => Config::load(&path).map_err(|e| {
            error!("Failed to load config {}: {}", path, e);
            e
        })?,
        None => Config::default(),
    };
    if let Some(addr) = addr {
        config.bind = addr;
    }

    let server = ChatServer::bind(config).await.map_err(|e| {
        error!("{}", e);
        e
    })?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(shutdown).await?;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
