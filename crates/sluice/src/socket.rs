//! Listening socket construction.
//!
//! Builds a non-blocking, dual-stack stream socket with the option set a
//! production reactor needs: address and port reuse (so independent reactor
//! processes can share one port for load distribution), Nagle buffering
//! disabled, and IPv4-mapped clients accepted on the IPv6 descriptor.
//!
//! All syscalls go through `libc`; any failure captures
//! `io::Error::last_os_error()` and names the failing step. Startup treats
//! these as unrecoverable — there is no meaningful retry for a socket that
//! cannot be created at all.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use crate::error::Error;

// ── Option helpers ──────────────────────────────────────────────────

fn set_socket_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let result = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Disable Nagle buffering. Applied to the listening socket and to every
/// accepted client descriptor.
pub(crate) fn set_nodelay(fd: RawFd) -> io::Result<()> {
    set_socket_option(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1)
}

fn setup_step(step: &'static str, result: io::Result<()>) -> Result<(), Error> {
    result.map_err(|source| Error::SocketSetup { step, source })
}

// ── Address helpers ─────────────────────────────────────────────────

/// Convert a raw `sockaddr_storage` (as filled in by `accept4` or
/// `getsockname`) into a `SocketAddr`.
pub(crate) fn raw_to_socket_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = std::net::Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(sin.sin_port);
            Ok(SocketAddr::V4(std::net::SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Ok(SocketAddr::V6(std::net::SocketAddrV6::new(
                ip,
                port,
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "unknown address family",
        )),
    }
}

/// Port the descriptor is actually bound to. Needed when binding port 0.
pub(crate) fn local_port(fd: RawFd) -> io::Result<u16> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let result = unsafe {
        libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    raw_to_socket_addr(&storage).map(|addr| addr.port())
}

// ── Listening socket ────────────────────────────────────────────────

/// Create the non-blocking dual-stack listening socket and apply its
/// option set. The descriptor is not yet bound.
pub fn create_listening_socket() -> Result<OwnedFd, Error> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET6,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(Error::SocketSetup {
            step: "socket",
            source: io::Error::last_os_error(),
        });
    }
    let owned = unsafe { OwnedFd::from_raw_fd(fd) };
    let raw = owned.as_raw_fd();

    setup_step(
        "setsockopt(SO_REUSEADDR)",
        set_socket_option(raw, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1),
    )?;
    setup_step(
        "setsockopt(SO_REUSEPORT)",
        set_socket_option(raw, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1),
    )?;
    // 0 = dual-stack: IPv4 clients arrive as mapped addresses.
    setup_step(
        "setsockopt(IPV6_V6ONLY)",
        set_socket_option(raw, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, 0),
    )?;
    setup_step("setsockopt(TCP_NODELAY)", set_nodelay(raw))?;

    tracing::info!(fd = raw, "created non-blocking dual-stack listening socket");
    Ok(owned)
}

/// Bind the descriptor to the wildcard address on `port` and mark it
/// passive with the given backlog.
pub fn bind_and_listen(fd: RawFd, port: u16, backlog: u32) -> Result<(), Error> {
    // Zeroed sockaddr is load-bearing: sin6_addr stays in6addr_any and no
    // garbage reaches the kernel.
    let mut addr: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    addr.sin6_port = port.to_be();

    let result = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
        )
    };
    if result < 0 {
        return Err(Error::SocketSetup {
            step: "bind",
            source: io::Error::last_os_error(),
        });
    }
    tracing::info!(fd, port, "bound listening socket");

    let result = unsafe { libc::listen(fd, backlog as libc::c_int) };
    if result < 0 {
        return Err(Error::SocketSetup {
            step: "listen",
            source: io::Error::last_os_error(),
        });
    }
    tracing::info!(fd, backlog, "listening socket is passive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;

    fn listening_fd() -> (OwnedFd, u16) {
        let fd = create_listening_socket().unwrap();
        bind_and_listen(fd.as_raw_fd(), 0, 16).unwrap();
        let port = local_port(fd.as_raw_fd()).unwrap();
        (fd, port)
    }

    #[test]
    fn listener_reaches_listening_state_on_ephemeral_port() {
        let (_fd, port) = listening_fd();
        assert_ne!(port, 0);
    }

    #[test]
    fn accepts_ipv4_mapped_clients() {
        let (_fd, port) = listening_fd();
        // Connect succeeds once the kernel queues the connection; no accept
        // call is required for the handshake to complete.
        TcpStream::connect(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn accepts_native_ipv6_clients() {
        let (_fd, port) = listening_fd();
        TcpStream::connect(("::1", port)).unwrap();
    }

    #[test]
    fn two_listeners_share_a_port() {
        // SO_REUSEPORT allows independent reactor processes to split load.
        let (fd_a, port) = listening_fd();
        let fd_b = create_listening_socket().unwrap();
        bind_and_listen(fd_b.as_raw_fd(), port, 16).unwrap();
        drop(fd_a);
        drop(fd_b);
    }

    #[test]
    fn mapped_v4_storage_converts() {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let sin = unsafe { &mut *(&mut storage as *mut _ as *mut libc::sockaddr_in) };
        sin.sin_family = libc::AF_INET as libc::sa_family_t;
        sin.sin_port = 8000u16.to_be();
        sin.sin_addr.s_addr = u32::from_ne_bytes([127, 0, 0, 1]);
        let addr = raw_to_socket_addr(&storage).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:8000");
    }

    #[test]
    fn unknown_family_is_rejected() {
        let storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        assert!(raw_to_socket_addr(&storage).is_err());
    }
}
