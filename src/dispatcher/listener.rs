//! Listening sockets, one per configured address family.
//!
//! IPv6 is bound with `IPV6_V6ONLY` so the two sockets never compete for
//! the same IPv4-mapped connections.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener};
use std::os::fd::{AsRawFd, OwnedFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, Backlog, SockFlag, SockType,
    SockaddrIn, SockaddrIn6,
};
use tracing::{debug, info};

use crate::config::ListenerConfig;
use crate::{AppError, Result};

/// Address family of a listening socket.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Family {
    /// `0.0.0.0:port`.
    Ipv4,
    /// `[::]:port`, IPv6 only.
    Ipv6,
}

impl Family {
    fn any_addr(self, port: u16) -> SocketAddr {
        match self {
            Self::Ipv4 => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)),
            Self::Ipv6 => SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0)),
        }
    }
}

/// Bind every family enabled in `config`, IPv4 first.
///
/// # Errors
///
/// Returns `AppError::Bind` on the first socket that cannot be created,
/// bound or put into listening state.
pub fn bind_all(config: &ListenerConfig) -> Result<Vec<TcpListener>> {
    let families = [
        (config.ipv4, Family::Ipv4),
        (config.ipv6, Family::Ipv6),
    ];

    families
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, family)| bind_any(family, config.port, config.backlog))
        .collect()
}

/// Bind one non-blocking listener on the unspecified address of `family`.
///
/// # Errors
///
/// Returns `AppError::Bind` if any socket call fails.
pub fn bind_any(family: Family, port: u16, backlog: u16) -> Result<TcpListener> {
    bind_addr(family.any_addr(port), backlog)
}

/// Bind one non-blocking listener on `addr`.
///
/// # Errors
///
/// Returns `AppError::Bind` if any socket call fails.
pub fn bind_addr(addr: SocketAddr, backlog: u16) -> Result<TcpListener> {
    let bind_err = |step: &str, err: nix::Error| AppError::Bind(format!("{step} {addr}: {err}"));

    let fd: OwnedFd = match addr {
        SocketAddr::V4(v4) => {
            let fd = new_socket(AddressFamily::Inet).map_err(|err| bind_err("socket", err))?;
            setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(|err| bind_err("SO_REUSEADDR", err))?;
            bind(fd.as_raw_fd(), &SockaddrIn::from(v4)).map_err(|err| bind_err("bind", err))?;
            fd
        }
        SocketAddr::V6(v6) => {
            let fd = new_socket(AddressFamily::Inet6).map_err(|err| bind_err("socket", err))?;
            setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(|err| bind_err("SO_REUSEADDR", err))?;
            setsockopt(&fd, sockopt::Ipv6V6Only, &true)
                .map_err(|err| bind_err("IPV6_V6ONLY", err))?;
            bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)).map_err(|err| bind_err("bind", err))?;
            fd
        }
    };

    let backlog = Backlog::new(backlog).unwrap_or_else(|_| {
        debug!(requested = backlog, "backlog above platform maximum, clamping");
        Backlog::MAXCONN
    });
    listen(&fd, backlog).map_err(|err| bind_err("listen", err))?;

    let listener = TcpListener::from(fd);
    listener
        .set_nonblocking(true)
        .map_err(|err| AppError::Bind(format!("non-blocking {addr}: {err}")))?;

    let local = listener
        .local_addr()
        .map_err(|err| AppError::Bind(format!("local address of {addr}: {err}")))?;
    info!(address = %local, "listener bound");

    Ok(listener)
}

/// A close-on-exec stream socket, so listeners never leak into workers.
fn new_socket(family: AddressFamily) -> nix::Result<OwnedFd> {
    let fd = socket(family, SockType::Stream, SockFlag::empty(), None)?;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(fd)
}
