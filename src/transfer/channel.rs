//! The dispatch channel: one Unix stream pair whose receiving end is shared
//! by every worker.
//!
//! The dispatcher keeps the sending end. Each worker gets its own duplicate
//! of the receiving end; all duplicates refer to the same socket, so every
//! transfer message is consumed by exactly one of them.

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;

use super::codec::{self, Receipt};
use crate::{AppError, Result};

/// Both ends of a freshly created dispatch channel.
#[derive(Debug)]
pub struct DispatchChannel {
    sender: UnixStream,
    shared: UnixStream,
}

impl DispatchChannel {
    /// Create the channel.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the socket pair cannot be created.
    pub fn open() -> Result<Self> {
        let (sender, shared) = UnixStream::pair()
            .map_err(|err| AppError::Io(format!("failed to create dispatch channel: {err}")))?;
        Ok(Self { sender, shared })
    }

    /// Duplicate the shared receiving end for one more worker.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the descriptor cannot be duplicated.
    pub fn receiver(&self) -> Result<ChannelReceiver> {
        let dup = self
            .shared
            .try_clone()
            .map_err(|err| AppError::Io(format!("failed to duplicate dispatch channel: {err}")))?;
        Ok(ChannelReceiver(dup))
    }

    /// Keep only the sending end, closing this process's receiving end.
    #[must_use]
    pub fn into_sender(self) -> ChannelSender {
        ChannelSender(self.sender)
    }
}

/// Dispatcher side of the channel. Blocking.
#[derive(Debug)]
pub struct ChannelSender(UnixStream);

impl ChannelSender {
    /// Transfer `handle` to whichever worker receives it first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transfer` if the handle could not be sent. The
    /// handle is released either way.
    pub fn send(&self, handle: impl Into<OwnedFd>) -> Result<()> {
        codec::send_handle(&self.0, handle)
    }
}

impl AsFd for ChannelSender {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// Worker side of the channel.
#[derive(Debug)]
pub struct ChannelReceiver(UnixStream);

impl ChannelReceiver {
    /// Adopt the receiving end a supervisor installed as this process's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if stdin cannot be duplicated.
    pub fn from_stdin() -> Result<Self> {
        let fd = io::stdin()
            .as_fd()
            .try_clone_to_owned()
            .map_err(|err| AppError::Io(format!("failed to adopt dispatch channel from stdin: {err}")))?;
        Ok(Self(UnixStream::from(fd)))
    }

    /// Switch the shared endpoint to non-blocking mode, so a lost race reads
    /// as [`Receipt::WouldBlock`] instead of parking the worker.
    ///
    /// The flag lives on the shared socket, so it applies to every duplicate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the flag cannot be set.
    pub fn set_nonblocking(&self) -> Result<()> {
        self.0
            .set_nonblocking(true)
            .map_err(|err| AppError::Io(format!("failed to make dispatch channel non-blocking: {err}")))
    }

    /// Receive one handle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transfer` on a receive failure or malformed message.
    pub fn recv(&self) -> Result<Receipt> {
        codec::recv_handle(&self.0)
    }
}

impl AsFd for ChannelReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl From<ChannelReceiver> for OwnedFd {
    fn from(receiver: ChannelReceiver) -> Self {
        receiver.0.into()
    }
}
