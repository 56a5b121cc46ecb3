//! Immutable run parameters, supplied once at startup.

use std::time::Duration;

use crate::error::Error;

/// Run parameters for a reactor instance.
///
/// Supplied by the bootstrap collaborator and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port bound on the wildcard dual-stack address. Port 0 lets the
    /// kernel pick one (useful for tests; read it back with
    /// [`Reactor::local_port`](crate::Reactor::local_port)).
    pub port: u16,
    /// Depth of the kernel queue of fully established, not yet accepted
    /// connections.
    pub backlog: u32,
    /// Maximum readiness events returned by one multiplexer wait.
    pub max_events: usize,
    /// Multiplexer wait timeout. `None` blocks indefinitely; `Some(ZERO)`
    /// returns immediately.
    pub wait_timeout: Option<Duration>,
    /// Size of the reusable per-read buffer in bytes.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8000,
            backlog: 1024,
            max_events: 1024,
            wait_timeout: Some(Duration::from_millis(300)),
            read_buffer_size: 1024,
        }
    }
}

impl ServerConfig {
    /// Reject parameter combinations the reactor cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.backlog == 0 {
            return Err(Error::InvalidConfig("backlog must be positive"));
        }
        if self.max_events == 0 {
            return Err(Error::InvalidConfig("max_events must be positive"));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig("read_buffer_size must be positive"));
        }
        Ok(())
    }
}
