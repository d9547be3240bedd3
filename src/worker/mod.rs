//! Worker multiplexer: one single-threaded readiness loop per worker.
//!
//! Every round the worker waits on the shared dispatch channel and all of
//! its own connections at once, then:
//!
//! 1. services readable connections in ascending identifier order, closing
//!    those that reach EOF or fail;
//! 2. if the dispatch channel is readable, races the other workers for the
//!    pending handle. Losing the race is a normal outcome.
//!
//! The loop ends when the dispatch channel reaches EOF. A malformed
//! transfer message or a receive failure is fatal to the worker.

pub mod connections;
pub mod handler;

use std::io::Write;
use std::os::fd::AsFd;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, trace};

pub use connections::{ActiveConnections, ConnectionId};
pub use handler::{ConnectionHandler, EchoHandler, Flow};

use crate::supervisor::WORKER_INDEX_ENV;
use crate::transfer::{ChannelReceiver, Receipt};
use crate::{AppError, Result};

/// Counters a worker reports when it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    /// Worker process id.
    pub pid: u32,
    /// Handles this worker won.
    pub received: u64,
    /// Connections closed after EOF or an I/O error.
    pub closed: u64,
    /// Connections still owned at the time of the report.
    pub active: usize,
}

/// Result of one loop round.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Turn {
    /// Keep looping.
    Continue,
    /// The dispatch channel reached EOF.
    Shutdown,
}

/// Sources found ready by one readiness wait.
#[derive(Debug, Default)]
struct Readiness {
    channel: bool,
    connections: Vec<ConnectionId>,
}

/// One worker: the shared channel endpoint, the connections it owns and
/// the handler serving them. All state is private to the worker.
#[derive(Debug)]
pub struct Worker<H> {
    channel: ChannelReceiver,
    connections: ActiveConnections,
    handler: H,
    pid: u32,
    received: u64,
    closed: u64,
}

impl<H: ConnectionHandler> Worker<H> {
    /// Prepare a worker. Puts the channel endpoint in non-blocking mode so
    /// the channel is its only initial readiness source and a lost race
    /// never blocks.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the endpoint cannot be made non-blocking.
    pub fn new(channel: ChannelReceiver, handler: H) -> Result<Self> {
        channel.set_nonblocking()?;
        Ok(Self {
            channel,
            connections: ActiveConnections::new(),
            handler,
            pid: std::process::id(),
            received: 0,
            closed: 0,
        })
    }

    /// Connections currently owned.
    #[must_use]
    pub fn connections(&self) -> &ActiveConnections {
        &self.connections
    }

    /// Counters as of now.
    #[must_use]
    pub fn report(&self) -> WorkerReport {
        WorkerReport {
            pid: self.pid,
            received: self.received,
            closed: self.closed,
            active: self.connections.len(),
        }
    }

    /// Loop until the dispatch channel reaches EOF.
    ///
    /// Connections still owned at that point are closed when the worker is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transfer` on a malformed message or receive
    /// failure, and `AppError::Io` if the readiness wait fails.
    pub fn run(mut self) -> Result<WorkerReport> {
        let span = info_span!("worker", pid = self.pid);
        let _guard = span.enter();
        info!("worker ready");

        while self.turn()? == Turn::Continue {}

        let report = self.report();
        info!(
            received = report.received,
            closed = report.closed,
            active = report.active,
            "dispatch channel closed, worker exiting"
        );
        Ok(report)
    }

    /// Run one round: wait, service connections, then race for a handle.
    ///
    /// # Errors
    ///
    /// See [`Worker::run`].
    pub fn turn(&mut self) -> Result<Turn> {
        let ready = self.wait()?;

        for id in ready.connections {
            let Some(conn) = self.connections.get_mut(id) else {
                continue;
            };
            if self.handler.on_readable(conn) == Flow::Closed {
                self.connections.close(id);
                self.closed += 1;
                debug!(fd = id, active = self.connections.len(), "connection closed");
            }
        }

        if !ready.channel {
            return Ok(Turn::Continue);
        }

        match self.channel.recv()? {
            Receipt::Closed => return Ok(Turn::Shutdown),
            Receipt::WouldBlock => trace!("lost the race for a handle"),
            Receipt::Handle(handle) => {
                let id = self.connections.adopt(handle);
                self.received += 1;
                info!(pid = self.pid, fd = id, "won the race for a connection");
            }
        }

        Ok(Turn::Continue)
    }

    fn wait(&self) -> Result<Readiness> {
        let mut ids = Vec::with_capacity(self.connections.len());
        let mut fds = Vec::with_capacity(self.connections.len() + 1);
        fds.push(PollFd::new(self.channel.as_fd(), PollFlags::POLLIN));
        for (id, stream) in self.connections.iter() {
            ids.push(id);
            fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Readiness::default()),
            Err(err) => return Err(AppError::Io(format!("worker poll failed: {err}"))),
        }

        Ok(Readiness {
            channel: is_ready(&fds[0]),
            connections: ids
                .into_iter()
                .zip(&fds[1..])
                .filter(|(_, fd)| is_ready(fd))
                .map(|(id, _)| id)
                .collect(),
        })
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

/// Entry point of a worker process started by the supervisor.
///
/// The dispatch channel arrives as stdin. On a clean exit the report is
/// written to stdout as one JSON line.
///
/// # Errors
///
/// Returns any error that ends the worker loop.
pub fn run_worker_process(chunk_size: usize) -> Result<WorkerReport> {
    let index = std::env::var(WORKER_INDEX_ENV).unwrap_or_default();
    debug!(index = %index, chunk_size, "worker process starting");
    let channel = ChannelReceiver::from_stdin()?;
    let report = Worker::new(channel, EchoHandler::new(chunk_size))?.run()?;

    let line = serde_json::to_string(&report)
        .map_err(|err| AppError::Io(format!("failed to encode worker report: {err}")))?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;

    Ok(report)
}
