//! Byte transport capability.
//!
//! The reactor consumes bytes through this trait instead of touching raw
//! descriptors directly, so a security collaborator (TLS or similar) can be
//! substituted in front of a descriptor transparently. Every operation
//! honours the would-block contract: "nothing more right now" is a normal
//! outcome, never an error.

use std::io;
use std::os::unix::io::RawFd;

/// Outcome of one non-blocking read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were consumed into the buffer.
    Data(usize),
    /// The peer performed an orderly shutdown.
    Closed,
    /// No data is currently available; the drain is over.
    WouldBlock,
}

/// Outcome of one non-blocking write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// `n` bytes were queued (possibly fewer than requested).
    Sent(usize),
    /// The send buffer is full; retry on the next writability transition.
    WouldBlock,
}

/// Outcome of one handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The transport is established and ready for reads and writes.
    Complete,
    /// More I/O is needed; retry on the next readiness event.
    WouldBlock,
}

/// A byte transport over one connected descriptor.
///
/// Implementations do not own the descriptor; the connection registry does.
pub trait Transport {
    /// Drive the transport handshake one step. Plaintext transports
    /// complete immediately; negotiated transports may need several
    /// readiness events.
    fn handshake(&mut self) -> io::Result<HandshakeStatus>;

    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus>;

    /// Write up to `buf.len()` bytes. The reactor core never initiates
    /// writes; this exists so response-writing collaborators can share the
    /// transport.
    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus>;
}

/// Builds the transport wrapped around each accepted descriptor.
pub type TransportFactory = Box<dyn Fn(RawFd) -> Box<dyn Transport>>;

/// Raw-descriptor transport: `recv`/`send` with no negotiation.
pub struct Plaintext {
    fd: RawFd,
}

impl Plaintext {
    /// Wrap a connected non-blocking descriptor. Does not take ownership.
    pub fn new(fd: RawFd) -> Self {
        Plaintext { fd }
    }
}

impl Transport for Plaintext {
    fn handshake(&mut self) -> io::Result<HandshakeStatus> {
        Ok(HandshakeStatus::Complete)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        loop {
            let n = unsafe {
                libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n > 0 {
                return Ok(ReadStatus::Data(n as usize));
            }
            if n == 0 {
                return Ok(ReadStatus::Closed);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(ReadStatus::WouldBlock),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<WriteStatus> {
        loop {
            let n = unsafe {
                libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), 0)
            };
            if n >= 0 {
                return Ok(WriteStatus::Sent(n as usize));
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(WriteStatus::WouldBlock),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;

    /// A connected pair: the reactor-side socket (non-blocking) and the
    /// peer-side std stream.
    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (server, peer)
    }

    fn settle() {
        std::thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn handshake_completes_immediately() {
        let (server, _peer) = connected_pair();
        let mut transport = Plaintext::new(server.as_raw_fd());
        assert_eq!(transport.handshake().unwrap(), HandshakeStatus::Complete);
    }

    #[test]
    fn empty_socket_reads_would_block() {
        let (server, _peer) = connected_pair();
        let mut transport = Plaintext::new(server.as_raw_fd());
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), ReadStatus::WouldBlock);
    }

    #[test]
    fn pending_bytes_read_then_would_block() {
        let (server, mut peer) = connected_pair();
        let mut transport = Plaintext::new(server.as_raw_fd());
        peer.write_all(b"hello").unwrap();
        settle();

        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), ReadStatus::Data(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(transport.read(&mut buf).unwrap(), ReadStatus::WouldBlock);
    }

    #[test]
    fn peer_shutdown_reads_closed() {
        let (server, peer) = connected_pair();
        let mut transport = Plaintext::new(server.as_raw_fd());
        peer.shutdown(Shutdown::Write).unwrap();
        settle();

        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), ReadStatus::Closed);
    }

    #[test]
    fn write_reaches_the_peer() {
        let (server, mut peer) = connected_pair();
        let mut transport = Plaintext::new(server.as_raw_fd());
        assert_eq!(transport.write(b"pong").unwrap(), WriteStatus::Sent(4));

        peer.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
