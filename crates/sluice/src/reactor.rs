//! The reactor loop.
//!
//! Waits on the multiplexer and dispatches each ready descriptor through
//! its tagged registry entry: the listening socket feeds the accept drain,
//! client descriptors feed the read drain, and hard error/hangup events
//! tear the connection down without attempting a read.
//!
//! Single-threaded and cooperative: the multiplexer wait is the only
//! suspension point, and all events of one pass are handled before the
//! next wait.

use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

use crate::acceptor;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::poller::{Event, Events, Interest, Poller};
use crate::reader::{DataReader, DrainOutcome};
use crate::registry::{ConnState, Entry, Registry};
use crate::socket;
use crate::transport::{HandshakeStatus, Plaintext, Transport, TransportFactory};

/// Interest mask for the listening socket.
const LISTENER_INTEREST: Interest = Interest::READABLE.edge_triggered();

/// Subscriber for connection lifecycle and inbound bytes.
///
/// This is the seam where a protocol layer attaches. The reactor itself
/// defines no framing and writes no responses.
pub trait ConnectionHandler {
    /// A new peer was accepted and registered under `key`.
    fn on_accept(&mut self, key: usize, peer: SocketAddr) {
        let _ = (key, peer);
    }

    /// One chunk of inbound bytes, delivered in arrival order.
    fn on_data(&mut self, key: usize, data: &[u8]);

    /// The connection was unregistered and closed.
    fn on_close(&mut self, key: usize) {
        let _ = key;
    }
}

/// The readiness-driven server reactor.
///
/// Owns the listening socket, the multiplexer, the connection registry,
/// and the reusable read buffer. Everything is mutated from the single
/// thread driving [`run`](Reactor::run) or [`poll_once`](Reactor::poll_once).
pub struct Reactor<H> {
    config: ServerConfig,
    poller: Poller,
    registry: Registry,
    events: Events,
    reader: DataReader,
    listener_key: usize,
    port: u16,
    handler: H,
    make_transport: TransportFactory,
}

impl<H: ConnectionHandler> Reactor<H> {
    /// Build the listening socket, bind it, and register it with a fresh
    /// multiplexer. Accepted descriptors carry a raw plaintext transport.
    pub fn bind(config: ServerConfig, handler: H) -> Result<Self, Error> {
        Self::with_transport(
            config,
            handler,
            Box::new(|fd| Box::new(Plaintext::new(fd)) as Box<dyn Transport>),
        )
    }

    /// Like [`bind`](Reactor::bind), but every accepted descriptor is
    /// wrapped through `make_transport` — the hook for a transport-security
    /// collaborator honouring the would-block contract.
    pub fn with_transport(
        config: ServerConfig,
        handler: H,
        make_transport: TransportFactory,
    ) -> Result<Self, Error> {
        config.validate()?;

        let listener = socket::create_listening_socket()?;
        let raw = listener.as_raw_fd();
        socket::bind_and_listen(raw, config.port, config.backlog)?;
        let port = socket::local_port(raw).map_err(|source| Error::SocketSetup {
            step: "getsockname",
            source,
        })?;

        let poller = Poller::new()?;
        let mut registry = Registry::new();
        let listener_key = registry.insert_listener(listener);
        poller.register(raw, listener_key, LISTENER_INTEREST)?;

        let events = Events::with_capacity(config.max_events);
        let reader = DataReader::new(config.read_buffer_size);

        Ok(Reactor {
            config,
            poller,
            registry,
            events,
            reader,
            listener_key,
            port,
            handler,
            make_transport,
        })
    }

    /// Port the listening socket is bound to.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Number of live client connections.
    pub fn connection_count(&self) -> usize {
        self.registry.client_count()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Serve until a fatal error stops the loop.
    ///
    /// Connection-scoped failures are handled inside the loop; only
    /// conditions the reactor cannot make progress past propagate out.
    pub fn run(&mut self) -> Result<(), Error> {
        tracing::info!(port = self.port, "reactor entering wait loop");
        loop {
            self.poll_once()?;
        }
    }

    /// One wait-and-dispatch pass. Returns the number of readiness events
    /// handled, which is zero when the wait timed out.
    pub fn poll_once(&mut self) -> Result<usize, Error> {
        let count = self.poller.wait(&mut self.events, self.config.wait_timeout)?;
        // Snapshot the batch, then mutate the registry freely while
        // handling it.
        let batch: Vec<Event> = self.events.iter().collect();
        for event in batch {
            self.dispatch(event)?;
        }
        Ok(count)
    }

    fn dispatch(&mut self, event: Event) -> Result<(), Error> {
        match self.registry.get(event.key) {
            Some(Entry::Listener(_)) => self.accept_ready(),
            Some(Entry::Client(_)) => {
                self.client_ready(event);
                Ok(())
            }
            None => {
                // The entry departed earlier in this pass.
                tracing::debug!(key = event.key, "event for departed descriptor");
                Ok(())
            }
        }
    }

    fn accept_ready(&mut self) -> Result<(), Error> {
        let listener_fd = match self.registry.get(self.listener_key) {
            Some(Entry::Listener(fd)) => fd.as_raw_fd(),
            _ => return Ok(()),
        };
        let handler = &mut self.handler;
        let result = acceptor::accept_all(
            listener_fd,
            &self.poller,
            &mut self.registry,
            self.make_transport.as_ref(),
            |key, peer| handler.on_accept(key, peer),
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_connection_scoped() => {
                tracing::warn!(%err, "accept drain aborted; continuing to serve");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn client_ready(&mut self, event: Event) {
        // A hard error or reset: tear down without attempting a read.
        if event.error {
            self.close_connection(event.key, "peer reset");
            return;
        }

        // Peer half-close (RDHUP) may still have data queued ahead of the
        // closure, so it flows through the normal drain and the closure is
        // observed as the zero-byte read.
        let key = event.key;
        let conn = match self.registry.get_mut(key) {
            Some(Entry::Client(conn)) => conn,
            _ => return,
        };
        if conn.state == ConnState::Handshaking {
            match conn.transport.handshake() {
                Ok(HandshakeStatus::Complete) => {
                    conn.state = ConnState::Established;
                    tracing::debug!(key, "transport handshake complete");
                }
                Ok(HandshakeStatus::WouldBlock) => return,
                Err(source) => {
                    let err = Error::Handshake { source };
                    tracing::warn!(key, %err, "closing connection");
                    self.close_connection(key, "handshake failed");
                    return;
                }
            }
        }

        let registry = &mut self.registry;
        let reader = &mut self.reader;
        let handler = &mut self.handler;
        let conn = match registry.get_mut(key) {
            Some(Entry::Client(conn)) => conn,
            _ => return,
        };
        let result = reader.drain(conn.transport.as_mut(), |chunk| {
            handler.on_data(key, chunk)
        });
        match result {
            Ok(DrainOutcome::Drained { received }) => {
                tracing::debug!(key, received, "connection drained");
            }
            Ok(DrainOutcome::Closed { received }) => {
                tracing::debug!(key, received, "orderly closure observed");
                self.close_connection(key, "peer closed");
            }
            Err(err) => {
                tracing::warn!(key, %err, "closing connection");
                self.close_connection(key, "read error");
            }
        }
    }

    /// Unregister and close one registry entry. Unregistration happens
    /// strictly before the descriptor drops closed; the reverse order is
    /// undefined with kernel-level multiplexers.
    fn close_connection(&mut self, key: usize, reason: &'static str) {
        let entry = match self.registry.remove(key) {
            Some(entry) => entry,
            None => return,
        };
        match entry {
            Entry::Client(conn) => {
                if let Err(err) = self.poller.unregister(conn.raw_fd()) {
                    tracing::warn!(key, %err, "unregister failed during close");
                }
                self.handler.on_close(key);
                tracing::info!(key, peer = %conn.peer(), reason, "connection closed");
            }
            Entry::Listener(fd) => {
                if let Err(err) = self.poller.unregister(fd.as_raw_fd()) {
                    tracing::warn!(key, %err, "unregister failed during close");
                }
                tracing::info!(key, reason, "listening socket closed");
            }
        }
    }

    /// Tear the reactor down: every live client, then the listening
    /// socket, then the multiplexer instance.
    pub fn shutdown(mut self) {
        tracing::info!("shutting down reactor");
        for key in self.registry.client_keys() {
            self.close_connection(key, "server shutdown");
        }
        let listener_key = self.listener_key;
        self.close_connection(listener_key, "server shutdown");
    }
}
