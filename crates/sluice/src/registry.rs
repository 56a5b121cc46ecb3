//! Tagged connection registry.
//!
//! Maps multiplexer keys to live descriptors. The slab key doubles as the
//! key carried in kernel event payloads, so dispatch never compares raw
//! descriptor values (which are reused by the kernel after close).

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use slab::Slab;

use crate::transport::Transport;

/// Handshake progress of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// The transport handshake needs more readiness events.
    Handshaking,
    /// Bytes flow through the transport.
    Established,
}

/// One accepted peer.
pub struct ClientConn {
    pub(crate) fd: OwnedFd,
    pub(crate) peer: SocketAddr,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) state: ConnState,
}

impl ClientConn {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// A registered descriptor: the listening socket or an accepted peer.
pub enum Entry {
    Listener(OwnedFd),
    Client(ClientConn),
}

/// Slab-backed set of live registry entries.
#[derive(Default)]
pub struct Registry {
    slots: Slab<Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { slots: Slab::new() }
    }

    /// Insert the listening socket; returns its multiplexer key.
    pub fn insert_listener(&mut self, fd: OwnedFd) -> usize {
        self.slots.insert(Entry::Listener(fd))
    }

    /// Insert an accepted connection; returns its multiplexer key.
    pub fn insert_client(&mut self, conn: ClientConn) -> usize {
        self.slots.insert(Entry::Client(conn))
    }

    pub fn get(&self, key: usize) -> Option<&Entry> {
        self.slots.get(key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut Entry> {
        self.slots.get_mut(key)
    }

    /// Remove an entry. The caller is responsible for unregistering the
    /// descriptor from the multiplexer before the returned entry drops.
    pub fn remove(&mut self, key: usize) -> Option<Entry> {
        self.slots.try_remove(key)
    }

    pub fn client_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Client(_)))
            .count()
    }

    /// Keys of all live client entries, for teardown sweeps.
    pub fn client_keys(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Client(_) => Some(key),
                Entry::Listener(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Plaintext;
    use std::os::unix::io::FromRawFd;

    fn dummy_fd() -> OwnedFd {
        let fd = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        unsafe { OwnedFd::from_raw_fd(fd) }
    }

    fn dummy_client() -> ClientConn {
        let fd = dummy_fd();
        let raw = fd.as_raw_fd();
        ClientConn {
            fd,
            peer: "[::1]:9999".parse().unwrap(),
            transport: Box::new(Plaintext::new(raw)),
            state: ConnState::Established,
        }
    }

    #[test]
    fn keys_identify_entry_kinds() {
        let mut registry = Registry::new();
        let listener_key = registry.insert_listener(dummy_fd());
        let client_key = registry.insert_client(dummy_client());

        assert!(matches!(registry.get(listener_key), Some(Entry::Listener(_))));
        assert!(matches!(registry.get(client_key), Some(Entry::Client(_))));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.client_keys(), vec![client_key]);
    }

    #[test]
    fn removal_is_idempotent() {
        let mut registry = Registry::new();
        let key = registry.insert_client(dummy_client());
        assert!(registry.remove(key).is_some());
        assert!(registry.remove(key).is_none());
        assert!(registry.is_empty());
    }
}
