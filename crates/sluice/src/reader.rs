//! Read-drain loop.
//!
//! Edge-style readiness delivers one notification per transition, so a
//! partial read must be repeated until the transport reports exhaustion or
//! closure — stopping early would silently strand buffered bytes until the
//! peer happens to send again.

use crate::error::Error;
use crate::transport::{ReadStatus, Transport};

/// Result of draining one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No more data right now; the connection stays open.
    Drained {
        /// Total bytes delivered by this drain.
        received: usize,
    },
    /// The peer performed an orderly shutdown; unregister and close.
    Closed {
        /// Bytes delivered before the closure was observed.
        received: usize,
    },
}

/// Drains all currently available bytes on one connection.
///
/// Owns a single reusable read buffer for the reactor's lifetime; buffer
/// size is fixed at startup, so an adversarial configuration cannot grow
/// the stack and a busy reactor does not allocate per read.
pub struct DataReader {
    buf: Vec<u8>,
}

impl DataReader {
    pub fn new(buffer_size: usize) -> Self {
        DataReader {
            buf: vec![0; buffer_size],
        }
    }

    /// Read until the transport reports would-block or closure, forwarding
    /// each chunk to `on_data` in arrival order. Read failures are typed
    /// errors the caller scopes to this one connection.
    pub fn drain(
        &mut self,
        transport: &mut dyn Transport,
        mut on_data: impl FnMut(&[u8]),
    ) -> Result<DrainOutcome, Error> {
        let mut received = 0;
        loop {
            match transport
                .read(&mut self.buf)
                .map_err(|source| Error::Read { source })?
            {
                ReadStatus::Data(n) => {
                    received += n;
                    on_data(&self.buf[..n]);
                }
                ReadStatus::Closed => return Ok(DrainOutcome::Closed { received }),
                ReadStatus::WouldBlock => return Ok(DrainOutcome::Drained { received }),
            }
        }
    }
}
