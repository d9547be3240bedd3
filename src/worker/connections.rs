//! The per-worker set of owned connections.

use std::collections::BTreeMap;
use std::net::TcpStream;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Numeric identifier of an owned connection: its descriptor number.
pub type ConnectionId = RawFd;

/// Connections a worker has won and not yet closed.
///
/// Ordered by identifier, so readiness is always serviced in ascending
/// identifier order. Removing an entry closes the connection.
#[derive(Debug, Default)]
pub struct ActiveConnections {
    conns: BTreeMap<ConnectionId, TcpStream>,
}

impl ActiveConnections {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a transferred handle and return its identifier.
    pub fn adopt(&mut self, handle: OwnedFd) -> ConnectionId {
        let stream = TcpStream::from(handle);
        let id = stream.as_raw_fd();
        self.conns.insert(id, stream);
        id
    }

    /// Mutable access to one connection.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut TcpStream> {
        self.conns.get_mut(&id)
    }

    /// Deregister and close a connection. Returns whether it was present.
    pub fn close(&mut self, id: ConnectionId) -> bool {
        self.conns.remove(&id).is_some()
    }

    /// Identifiers and streams in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &TcpStream)> {
        self.conns.iter().map(|(id, stream)| (*id, stream))
    }

    /// Whether `id` is currently owned.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.conns.contains_key(&id)
    }

    /// Number of owned connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Whether no connection is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
