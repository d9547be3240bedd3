//! Per-connection behavior plugged into the worker loop.

use std::io::{ErrorKind, Read, Write};

use tracing::debug;

use crate::config::DEFAULT_CHUNK_SIZE;

/// What the worker does with a connection after servicing it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Flow {
    /// Keep the connection registered.
    Open,
    /// Deregister and close the connection.
    Closed,
}

/// Minimal connection contract: consume input, optionally produce output,
/// report closure.
///
/// Called once per readiness event. Implementations must not loop until the
/// peer goes quiet; the worker calls again on the next round.
pub trait ConnectionHandler {
    /// Service one readable connection.
    fn on_readable<S: Read + Write>(&mut self, conn: &mut S) -> Flow;
}

/// Writes every byte read back to the peer, verbatim and in order.
#[derive(Debug)]
pub struct EchoHandler {
    buf: Vec<u8>,
}

impl EchoHandler {
    /// Echo handler reading at most `chunk_size` bytes per event.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            buf: vec![0; chunk_size.max(1)],
        }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl ConnectionHandler for EchoHandler {
    fn on_readable<S: Read + Write>(&mut self, conn: &mut S) -> Flow {
        let read = loop {
            match conn.read(&mut self.buf) {
                Ok(0) => return Flow::Closed,
                Ok(n) => break n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Flow::Open,
                Err(err) => {
                    debug!(%err, "connection read failed");
                    return Flow::Closed;
                }
            }
        };

        match conn.write_all(&self.buf[..read]) {
            Ok(()) => Flow::Open,
            Err(err) => {
                debug!(%err, "connection write failed");
                Flow::Closed
            }
        }
    }
}
