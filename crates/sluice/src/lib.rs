//! sluice: a single-threaded, readiness-driven TCP server reactor.
//!
//! One thread, one listening socket, one kernel readiness multiplexer.
//! The reactor drains every ready descriptor to exhaustion — pending
//! connections on the listener, pending bytes on each peer — and hands
//! inbound bytes to a [`ConnectionHandler`]. It defines no framing and
//! writes no responses; protocol layers sit on top.
//!
//! # Quick Start
//!
//! ```ignore
//! use sluice::{ConnectionHandler, Reactor, ServerConfig};
//!
//! struct Echoless;
//!
//! impl ConnectionHandler for Echoless {
//!     fn on_data(&mut self, key: usize, data: &[u8]) {
//!         println!("connection {key}: {} bytes", data.len());
//!     }
//! }
//!
//! let config = ServerConfig { port: 8000, ..ServerConfig::default() };
//! let mut reactor = Reactor::bind(config, Echoless)?;
//! reactor.run()?;
//! ```
//!
//! Linux-only: the multiplexer wraps the kernel epoll facility directly.

pub(crate) mod acceptor;
pub mod config;
pub mod error;
pub mod poller;
pub mod reactor;
pub mod reader;
pub mod registry;
pub mod socket;
pub mod transport;

// Re-exports for convenience
pub use config::ServerConfig;
pub use error::Error;
pub use poller::{Event, Events, Interest, Poller};
pub use reactor::{ConnectionHandler, Reactor};
pub use reader::{DataReader, DrainOutcome};
pub use registry::{ConnState, Entry, Registry};
pub use transport::{
    HandshakeStatus, Plaintext, ReadStatus, Transport, TransportFactory, WriteStatus,
};
