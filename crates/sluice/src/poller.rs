//! Readiness multiplexer.
//!
//! Thin wrapper around one kernel epoll instance. The wrapper holds no
//! ownership over the descriptors it watches — only an interest relation
//! keyed by an opaque `usize` carried in the kernel event payload. Callers
//! must unregister a descriptor at or before the moment it is closed;
//! closing first leaves the kernel holding a stale watch.

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::error::Error;

// ── Interest ────────────────────────────────────────────────────────

/// Readiness interest for a registered descriptor.
///
/// A thin wrapper over the kernel event mask. Error and hangup conditions
/// are always reported by the kernel regardless of the mask; peer half-close
/// notification (`RDHUP`) and edge-triggered delivery are opted into here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    /// Read-availability.
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);

    /// Deliver one event per readiness transition instead of one per wait.
    /// Consumers must drain to exhaustion before the next wait.
    pub const fn edge_triggered(self) -> Interest {
        Interest(self.0 | libc::EPOLLET as u32)
    }

    /// Also report the peer shutting down its write side.
    pub const fn with_peer_hangup(self) -> Interest {
        Interest(self.0 | libc::EPOLLRDHUP as u32)
    }

    pub(crate) const fn bits(self) -> u32 {
        self.0
    }
}

// ── Events ──────────────────────────────────────────────────────────

/// One readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// The key the descriptor was registered under.
    pub key: usize,
    /// Data (or a pending connection) can be consumed without blocking.
    pub readable: bool,
    /// The peer shut down its write side; pending data may still precede
    /// the closure and must be drained first.
    pub peer_hangup: bool,
    /// The connection errored or was reset. Tear down without reading.
    pub error: bool,
}

/// Reusable buffer for the events returned by one wait.
pub struct Events {
    raw: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    /// Buffer holding at most `max_events` notifications per wait.
    pub fn with_capacity(max_events: usize) -> Self {
        Events {
            raw: vec![libc::epoll_event { events: 0, u64: 0 }; max_events],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.raw[..self.len].iter().map(|raw| {
            // Copy out of the packed struct before touching fields.
            let raw = *raw;
            Event {
                key: raw.u64 as usize,
                readable: raw.events & libc::EPOLLIN as u32 != 0,
                peer_hangup: raw.events & libc::EPOLLRDHUP as u32 != 0,
                error: raw.events & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0,
            }
        })
    }
}

// ── Poller ──────────────────────────────────────────────────────────

/// One kernel readiness-notification instance.
pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    /// Create the kernel instance. Failure here is unrecoverable — the
    /// reactor cannot run without a multiplexer.
    pub fn new() -> Result<Self, Error> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Multiplexer {
                op: "create",
                source: io::Error::last_os_error(),
            });
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(fd) };
        tracing::debug!(fd, "created readiness multiplexer");
        Ok(Poller { epfd })
    }

    /// Add a descriptor under `key` with the given interest.
    ///
    /// Registering the same descriptor twice is a contract violation and
    /// surfaces as [`Error::AlreadyRegistered`].
    pub fn register(&self, fd: RawFd, key: usize, interest: Interest) -> Result<(), Error> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: key as u64,
        };
        let result = unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if result < 0 {
            let source = io::Error::last_os_error();
            if source.raw_os_error() == Some(libc::EEXIST) {
                return Err(Error::AlreadyRegistered { fd });
            }
            return Err(Error::Multiplexer {
                op: "register",
                source,
            });
        }
        tracing::debug!(fd, key, "registered descriptor");
        Ok(())
    }

    /// Remove interest in a descriptor. The caller closes it afterwards.
    pub fn unregister(&self, fd: RawFd) -> Result<(), Error> {
        let result = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if result < 0 {
            return Err(Error::Multiplexer {
                op: "unregister",
                source: io::Error::last_os_error(),
            });
        }
        tracing::debug!(fd, "unregistered descriptor");
        Ok(())
    }

    /// Block until at least one registered descriptor is ready or the
    /// timeout elapses. Signal interruption retries transparently; it is
    /// not an error. Returns the number of events written into `events`.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> Result<usize, Error> {
        let timeout_ms: libc::c_int = match timeout {
            None => -1,
            Some(t) => libc::c_int::try_from(t.as_millis()).unwrap_or(libc::c_int::MAX),
        };
        loop {
            let count = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    events.raw.as_mut_ptr(),
                    events.raw.len() as libc::c_int,
                    timeout_ms,
                )
            };
            if count < 0 {
                let source = io::Error::last_os_error();
                if source.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(Error::Multiplexer { op: "wait", source });
            }
            events.len = count as usize;
            return Ok(events.len);
        }
    }
}
