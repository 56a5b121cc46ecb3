//! Accept-drain loop.
//!
//! Readiness notification guarantees one event per transition, so a single
//! accept per notification would strand queued connections. The drain
//! accepts until the kernel reports would-block.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::Error;
use crate::poller::{Interest, Poller};
use crate::registry::{ClientConn, ConnState, Registry};
use crate::socket;
use crate::transport::{HandshakeStatus, Transport};

/// Interest mask for accepted peers: read-availability plus peer hangup,
/// edge-triggered.
pub(crate) const CLIENT_INTEREST: Interest =
    Interest::READABLE.edge_triggered().with_peer_hangup();

/// Drain every pending inbound connection on the listening socket.
///
/// Each accepted descriptor is made non-blocking at accept time, gets Nagle
/// buffering disabled, is wrapped in a transport, inserted as a `Client`
/// registry entry, and registered with the multiplexer under its key.
/// `on_accept` fires once per registered connection.
///
/// Failures that concern a single pending connection (option setup,
/// handshake, registration) drop that connection and keep draining. A hard
/// accept failure returns a typed error for the caller to scope; would-block
/// ends the drain normally. Returns the number of connections registered.
pub(crate) fn accept_all(
    listener_fd: RawFd,
    poller: &Poller,
    registry: &mut Registry,
    make_transport: &dyn Fn(RawFd) -> Box<dyn Transport>,
    mut on_accept: impl FnMut(usize, SocketAddr),
) -> Result<usize, Error> {
    let mut accepted = 0;
    loop {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut addr_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

        let fd = unsafe {
            libc::accept4(
                listener_fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut addr_len,
                libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            match err.kind() {
                // Queue drained: the normal end of the loop.
                io::ErrorKind::WouldBlock => break,
                // The peer gave up between queueing and accept; next.
                io::ErrorKind::ConnectionAborted | io::ErrorKind::Interrupted => continue,
                _ => return Err(Error::Accept { source: err }),
            }
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let raw = fd.as_raw_fd();

        let peer = match socket::raw_to_socket_addr(&storage) {
            Ok(addr) => addr,
            Err(err) => {
                tracing::warn!(fd = raw, %err, "dropping connection: bad peer address");
                continue;
            }
        };
        if let Err(err) = socket::set_nodelay(raw) {
            tracing::warn!(%peer, %err, "dropping connection: TCP_NODELAY failed");
            continue;
        }

        let mut transport = make_transport(raw);
        let state = match transport.handshake() {
            Ok(HandshakeStatus::Complete) => ConnState::Established,
            Ok(HandshakeStatus::WouldBlock) => ConnState::Handshaking,
            Err(err) => {
                tracing::warn!(%peer, %err, "dropping connection: handshake failed");
                continue;
            }
        };

        let key = registry.insert_client(ClientConn {
            fd,
            peer,
            transport,
            state,
        });
        if let Err(err) = poller.register(raw, key, CLIENT_INTEREST) {
            tracing::warn!(%peer, %err, "dropping connection: cannot watch descriptor");
            registry.remove(key);
            continue;
        }

        tracing::info!(key, %peer, "accepted connection");
        accepted += 1;
        on_accept(key, peer);
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::time::Duration;

    use crate::transport::Plaintext;

    fn plaintext_factory() -> impl Fn(RawFd) -> Box<dyn Transport> {
        |fd| Box::new(Plaintext::new(fd)) as Box<dyn Transport>
    }

    fn listening_socket() -> (OwnedFd, u16) {
        let fd = socket::create_listening_socket().unwrap();
        socket::bind_and_listen(fd.as_raw_fd(), 0, 16).unwrap();
        let port = socket::local_port(fd.as_raw_fd()).unwrap();
        (fd, port)
    }

    #[test]
    fn drains_every_pending_connection() {
        let (listener, port) = listening_socket();
        let poller = Poller::new().unwrap();
        let mut registry = Registry::new();

        let clients: Vec<TcpStream> = (0..3)
            .map(|_| TcpStream::connect(("127.0.0.1", port)).unwrap())
            .collect();
        std::thread::sleep(Duration::from_millis(50));

        let mut seen = Vec::new();
        let accepted = accept_all(
            listener.as_raw_fd(),
            &poller,
            &mut registry,
            &plaintext_factory(),
            |key, _peer| seen.push(key),
        )
        .unwrap();

        assert_eq!(accepted, 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(registry.client_count(), 3);
        drop(clients);
    }

    #[test]
    fn empty_queue_terminates_on_would_block() {
        let (listener, _port) = listening_socket();
        let poller = Poller::new().unwrap();
        let mut registry = Registry::new();

        let accepted = accept_all(
            listener.as_raw_fd(),
            &poller,
            &mut registry,
            &plaintext_factory(),
            |_, _| panic!("nothing was pending"),
        )
        .unwrap();

        assert_eq!(accepted, 0);
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn second_drain_finds_nothing_new() {
        let (listener, port) = listening_socket();
        let poller = Poller::new().unwrap();
        let mut registry = Registry::new();

        let _client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let first = accept_all(
            listener.as_raw_fd(),
            &poller,
            &mut registry,
            &plaintext_factory(),
            |_, _| {},
        )
        .unwrap();
        let second = accept_all(
            listener.as_raw_fd(),
            &poller,
            &mut registry,
            &plaintext_factory(),
            |_, _| {},
        )
        .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(registry.client_count(), 1);
    }
}
