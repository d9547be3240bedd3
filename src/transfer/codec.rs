//! SCM_RIGHTS codec for moving one connection handle per message.
//!
//! # Wire format
//!
//! Every transfer is a single `sendmsg(2)` carrying:
//!
//! - a one byte payload holding the handle count, always `1` (some
//!   platforms drop ancillary data attached to an empty payload);
//! - exactly one `SOL_SOCKET`/`SCM_RIGHTS` control record holding exactly
//!   one descriptor.
//!
//! The receiving side rejects anything else. Descriptors that arrive in a
//! rejected but decodable message are closed before the error is returned.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::{AppError, Result};

/// Payload byte of every transfer message: the number of handles carried.
pub const HANDLE_COUNT: u8 = 1;

/// Descriptors a single receive has room for.
const RECEIVE_SLOTS: usize = 8;

/// Outcome of a single receive on the dispatch channel.
#[derive(Debug)]
pub enum Receipt {
    /// A handle was transferred; the caller now owns it exclusively.
    Handle(OwnedFd),
    /// The sending side is gone: the dispatch channel reached EOF.
    Closed,
    /// Nothing to receive. On a shared endpoint another receiver won the race.
    WouldBlock,
}

/// Control records found in a received message, already owning any
/// descriptors they carried.
enum Record {
    Rights(Vec<OwnedFd>),
    Other,
}

impl From<ControlMessageOwned> for Record {
    fn from(cmsg: ControlMessageOwned) -> Self {
        match cmsg {
            ControlMessageOwned::ScmRights(fds) => Self::Rights(fds.into_iter().map(adopt).collect()),
            _ => Self::Other,
        }
    }
}

/// Take ownership of a descriptor installed by `SCM_RIGHTS`.
#[allow(unsafe_code)]
fn adopt(fd: RawFd) -> OwnedFd {
    // SAFETY: the kernel installed `fd` into this process while delivering the
    // control message. Nothing else refers to it yet.
    unsafe { OwnedFd::from_raw_fd(fd) }
}

/// Transfer `handle` over `channel` and release the local copy.
///
/// The handle is consumed whether or not the transfer succeeds. A send that
/// reports zero bytes without an error is retried; interrupted sends are
/// restarted.
///
/// # Errors
///
/// Returns `AppError::Transfer` for any other send outcome.
pub fn send_handle(channel: &UnixStream, handle: impl Into<OwnedFd>) -> Result<()> {
    let handle: OwnedFd = handle.into();
    let payload = [HANDLE_COUNT];
    let iov = [IoSlice::new(&payload)];
    let fds = [handle.as_raw_fd()];
    let cmsgs = [ControlMessage::ScmRights(&fds)];

    loop {
        match sendmsg::<()>(channel.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None) {
            Ok(0) | Err(Errno::EINTR) => {}
            Ok(_) => return Ok(()),
            Err(err) => return Err(AppError::Transfer(format!("sendmsg failed: {err}"))),
        }
    }
}

/// Receive one handle from `channel`.
///
/// Checks run in a fixed order and the first failing check decides the
/// result:
///
/// 1. zero bytes read is EOF ([`Receipt::Closed`]); a receive error is a
///    failure, except `EAGAIN` which is [`Receipt::WouldBlock`];
/// 2. the payload byte must equal [`HANDLE_COUNT`];
/// 3. there must be exactly one control record, it must be `SCM_RIGHTS`
///    and carry exactly one descriptor, and control data must not have
///    been truncated.
///
/// # Errors
///
/// Returns `AppError::Transfer` on a receive failure or a malformed message.
pub fn recv_handle(channel: &UnixStream) -> Result<Receipt> {
    let mut payload = [0u8; 1];
    // Room for surplus descriptors, so they are delivered and closed here
    // rather than truncated away.
    let mut space = nix::cmsg_space!([RawFd; RECEIVE_SLOTS]);

    let (bytes, truncated, records) = loop {
        let mut iov = [IoSliceMut::new(&mut payload)];
        match recvmsg::<()>(channel.as_raw_fd(), &mut iov, Some(&mut space), recv_flags()) {
            Ok(msg) => {
                let truncated = msg.flags.contains(MsgFlags::MSG_TRUNC);
                let records = msg
                    .cmsgs()
                    .map(|cmsgs| cmsgs.map(Record::from).collect::<Vec<_>>());
                break (msg.bytes, truncated, records);
            }
            Err(Errno::EINTR) => {}
            Err(Errno::EAGAIN) => return Ok(Receipt::WouldBlock),
            Err(err) => return Err(AppError::Transfer(format!("recvmsg failed: {err}"))),
        }
    };

    if bytes == 0 {
        return Ok(Receipt::Closed);
    }

    if truncated || payload[0] != HANDLE_COUNT {
        return Err(AppError::Transfer(format!(
            "malformed message: handle count {} (expected {HANDLE_COUNT})",
            payload[0]
        )));
    }

    let records = records
        .map_err(|err| AppError::Transfer(format!("malformed message: control data truncated ({err})")))?;
    let mut records = records.into_iter();

    let handle = match records.next() {
        None => {
            return Err(AppError::Transfer(
                "malformed message: missing control record".into(),
            ))
        }
        Some(Record::Other) => {
            return Err(AppError::Transfer(
                "malformed message: unexpected control record type".into(),
            ))
        }
        Some(Record::Rights(fds)) => match <[OwnedFd; 1]>::try_from(fds) {
            Ok([fd]) => fd,
            Err(fds) => {
                return Err(AppError::Transfer(format!(
                    "malformed message: control record carries {} handles",
                    fds.len()
                )))
            }
        },
    };

    if records.next().is_some() {
        return Err(AppError::Transfer(
            "malformed message: extra control record".into(),
        ));
    }

    Ok(Receipt::Handle(handle))
}

/// Received descriptors are close-on-exec where the platform allows it, so
/// a worker never leaks connections into processes it starts.
#[cfg(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux"
))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(
    target_os = "android",
    target_os = "freebsd",
    target_os = "linux"
)))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}
