//! sluice bootstrap binary.
//!
//! Parses run parameters, initialises logging, and drives the reactor with
//! a handler that logs inbound bytes.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use sluice::{ConnectionHandler, Reactor, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Single-threaded readiness-driven TCP server reactor")]
#[command(version)]
struct Cli {
    /// Port to listen on (dual-stack wildcard address)
    #[arg(short, long, default_value_t = 8000, env = "SLUICE_PORT")]
    port: u16,

    /// Depth of the kernel queue of pending connections
    #[arg(long, default_value_t = 1024)]
    backlog: u32,

    /// Maximum readiness events handled per multiplexer wait
    #[arg(long, default_value_t = 1024)]
    max_events: usize,

    /// Multiplexer wait timeout in milliseconds; negative blocks
    /// indefinitely, 0 returns immediately
    #[arg(long, default_value_t = 300)]
    timeout_ms: i64,

    /// Size of the reusable read buffer in bytes
    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,
}

/// Logs every lifecycle transition and inbound chunk.
struct LoggingHandler;

impl ConnectionHandler for LoggingHandler {
    fn on_accept(&mut self, key: usize, peer: SocketAddr) {
        tracing::info!(key, %peer, "peer connected");
    }

    fn on_data(&mut self, key: usize, data: &[u8]) {
        tracing::info!(
            key,
            len = data.len(),
            payload = %String::from_utf8_lossy(data),
            "received bytes"
        );
    }

    fn on_close(&mut self, key: usize) {
        tracing::info!(key, "peer disconnected");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig {
        port: cli.port,
        backlog: cli.backlog,
        max_events: cli.max_events,
        wait_timeout: if cli.timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(cli.timeout_ms as u64))
        },
        read_buffer_size: cli.buffer_size,
    };

    let mut reactor = match Reactor::bind(config, LoggingHandler) {
        Ok(reactor) => reactor,
        Err(err) => {
            tracing::error!("failed to start reactor: {err}");
            return Err(err.into());
        }
    };

    tracing::info!(port = reactor.local_port(), "sluice serving");
    if let Err(err) = reactor.run() {
        tracing::error!("reactor terminated: {err}");
        return Err(err.into());
    }
    Ok(())
}
