//! The dispatcher: accept connections and hand them to the worker pool.
//!
//! The dispatcher owns its listening sockets for its whole lifetime and
//! never serves traffic itself. Each round it waits for readiness across
//! all listeners, accepts one pending connection per ready listener and
//! transfers it through the dispatch channel. Its own copy of every
//! accepted socket is released as soon as the transfer call returns.

pub mod listener;

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, info, warn};

use crate::config::AcceptPolicy;
use crate::transfer::ChannelSender;
use crate::{AppError, Result};

/// Counters reported when the dispatcher leaves its loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Handles transferred to the pool.
    pub dispatched: u64,
    /// Accept failures tolerated under [`AcceptPolicy::LogAndContinue`].
    pub accept_failures: u64,
}

/// Asks a running dispatcher to leave its loop.
#[derive(Debug)]
pub struct StopHandle(UnixStream);

impl StopHandle {
    /// Wake the dispatcher and make it stop. Idempotent; a dispatcher that
    /// is already gone is not an error.
    pub fn stop(&self) {
        if let Err(err) = (&self.0).write_all(&[1]) {
            debug!(%err, "stop request not delivered, dispatcher already gone");
        }
    }
}

/// Accepts connections and transfers them through the dispatch channel.
#[derive(Debug)]
pub struct Dispatcher {
    listeners: Vec<TcpListener>,
    channel: ChannelSender,
    policy: AcceptPolicy,
    stop_rx: UnixStream,
    stop_tx: UnixStream,
    summary: DispatchSummary,
}

impl Dispatcher {
    /// Build a dispatcher over already bound, non-blocking listeners.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the stop endpoint cannot be created.
    pub fn new(
        listeners: Vec<TcpListener>,
        channel: ChannelSender,
        policy: AcceptPolicy,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = UnixStream::pair()
            .map_err(|err| AppError::Io(format!("failed to create stop endpoint: {err}")))?;
        stop_tx
            .set_nonblocking(true)
            .map_err(|err| AppError::Io(format!("failed to configure stop endpoint: {err}")))?;

        Ok(Self {
            listeners,
            channel,
            policy,
            stop_rx,
            stop_tx,
            summary: DispatchSummary::default(),
        })
    }

    /// Addresses the listeners are bound to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if an address cannot be queried.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listeners
            .iter()
            .map(|listener| listener.local_addr().map_err(AppError::from))
            .collect()
    }

    /// A handle that stops [`Dispatcher::run`] from another thread.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the stop endpoint cannot be duplicated.
    pub fn stop_handle(&self) -> Result<StopHandle> {
        let tx = self
            .stop_tx
            .try_clone()
            .map_err(|err| AppError::Io(format!("failed to duplicate stop endpoint: {err}")))?;
        Ok(StopHandle(tx))
    }

    /// Dispatch until stopped or until a fatal failure.
    ///
    /// Returning drops the sending end of the dispatch channel, which every
    /// worker observes as EOF.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transfer` if a handle cannot be sent, and
    /// `AppError::Accept` on an accept failure under
    /// [`AcceptPolicy::FailFast`].
    pub fn run(mut self) -> Result<DispatchSummary> {
        info!(
            listeners = self.listeners.len(),
            policy = ?self.policy,
            "dispatching connections"
        );

        loop {
            let Some(ready) = self.wait()? else {
                info!(dispatched = self.summary.dispatched, "dispatcher stop requested");
                return Ok(self.summary);
            };

            for index in ready {
                self.dispatch_one(index)?;
            }
        }
    }

    /// Block until a listener is ready or a stop is requested.
    ///
    /// Returns the indices of ready listeners, or `None` on stop.
    fn wait(&self) -> Result<Option<Vec<usize>>> {
        let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(self.listeners.len() + 1);
        fds.push(PollFd::new(self.stop_rx.as_fd(), PollFlags::POLLIN));
        fds.extend(
            self.listeners
                .iter()
                .map(|listener| PollFd::new(listener.as_fd(), PollFlags::POLLIN)),
        );

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(Some(Vec::new())),
            Err(err) => return Err(AppError::Io(format!("dispatcher poll failed: {err}"))),
        }

        if is_ready(&fds[0]) {
            return Ok(None);
        }

        Ok(Some(
            fds[1..]
                .iter()
                .enumerate()
                .filter(|(_, fd)| is_ready(fd))
                .map(|(index, _)| index)
                .collect(),
        ))
    }

    /// Accept exactly one pending connection on listener `index` and hand it
    /// to the pool.
    fn dispatch_one(&mut self, index: usize) -> Result<()> {
        let Some(listener) = self.listeners.get(index) else {
            return Ok(());
        };

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                return Ok(());
            }
            Err(err) => return self.accept_failed(&err),
        };

        // Workers read and write claimed connections in blocking mode.
        if let Err(err) = stream.set_nonblocking(false) {
            warn!(%peer, %err, "failed to configure accepted connection, dropping it");
            return Ok(());
        }

        if let Err(err) = self.channel.send(stream) {
            error!(%peer, %err, "handle transfer failed");
            return Err(err);
        }

        self.summary.dispatched += 1;
        debug!(%peer, dispatched = self.summary.dispatched, "connection handed to pool");
        Ok(())
    }

    fn accept_failed(&mut self, err: &std::io::Error) -> Result<()> {
        match self.policy {
            AcceptPolicy::FailFast => {
                error!(%err, "accept failed");
                Err(AppError::Accept(err.to_string()))
            }
            AcceptPolicy::LogAndContinue => {
                self.summary.accept_failures += 1;
                warn!(%err, failures = self.summary.accept_failures, "accept failed, continuing");
                Ok(())
            }
        }
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}
