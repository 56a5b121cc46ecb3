//! Reactor error types.
//!
//! Every fallible operation returns a typed error carrying the failing step
//! and the underlying OS error. Whether a failure dooms one connection or
//! the whole process is the caller's call: startup and multiplexer failures
//! are fatal, per-peer failures are scoped to that peer's descriptor.

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

/// Errors that can occur while building or driving the reactor.
#[derive(Debug, Error)]
pub enum Error {
    /// A run parameter failed validation at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Listening socket creation, option setup, bind, or listen failed.
    #[error("socket setup failed at {step}: {source}")]
    SocketSetup {
        /// The syscall or option that failed.
        step: &'static str,
        source: io::Error,
    },

    /// The readiness multiplexer could not be created or driven.
    #[error("event multiplexer {op} failed: {source}")]
    Multiplexer {
        /// The multiplexer operation that failed.
        op: &'static str,
        source: io::Error,
    },

    /// A descriptor was registered twice. This is a programming-contract
    /// violation, not a runtime condition to recover from.
    #[error("descriptor {fd} is already registered with the multiplexer")]
    AlreadyRegistered {
        /// The offending descriptor.
        fd: RawFd,
    },

    /// Accepting a pending connection failed with something other than
    /// would-block.
    #[error("accept on listening socket failed: {source}")]
    Accept { source: io::Error },

    /// Reading from a peer failed with something other than would-block.
    #[error("read from peer failed: {source}")]
    Read { source: io::Error },

    /// A transport handshake failed outright (not would-block).
    #[error("transport handshake failed: {source}")]
    Handshake { source: io::Error },
}

impl Error {
    /// Whether this failure dooms only a single connection.
    ///
    /// Connection-scoped failures are logged, the offending descriptor is
    /// unregistered and closed, and the reactor keeps serving. Everything
    /// else leaves the reactor unable to make progress and propagates out
    /// of the run loop.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Error::Accept { .. } | Error::Read { .. } | Error::Handshake { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_step() {
        let err = Error::SocketSetup {
            step: "setsockopt(SO_REUSEADDR)",
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        let text = err.to_string();
        assert!(text.contains("setsockopt(SO_REUSEADDR)"), "{text}");

        let err = Error::Multiplexer {
            op: "wait",
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        assert!(err.to_string().contains("wait"));
    }

    #[test]
    fn per_peer_failures_are_connection_scoped() {
        let read = Error::Read {
            source: io::Error::from_raw_os_error(libc::ECONNRESET),
        };
        let accept = Error::Accept {
            source: io::Error::from_raw_os_error(libc::EMFILE),
        };
        assert!(read.is_connection_scoped());
        assert!(accept.is_connection_scoped());
    }

    #[test]
    fn startup_and_multiplexer_failures_are_fatal() {
        let setup = Error::SocketSetup {
            step: "bind",
            source: io::Error::from_raw_os_error(libc::EADDRINUSE),
        };
        let wait = Error::Multiplexer {
            op: "wait",
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        let twice = Error::AlreadyRegistered { fd: 7 };
        assert!(!setup.is_connection_scoped());
        assert!(!wait.is_connection_scoped());
        assert!(!twice.is_connection_scoped());
    }
}
