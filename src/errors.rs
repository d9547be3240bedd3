//! Error types shared across the relay.

use std::fmt::{Display, Formatter};

/// Shared relay result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Relay error enumeration covering every process-level failure mode.
///
/// Per-connection I/O errors are deliberately absent: they end the
/// connection they occurred on and never surface as an `AppError`.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Listening socket creation, bind or listen failure.
    Bind(String),
    /// Accepting a pending connection failed.
    Accept(String),
    /// Handle transfer failed or a malformed transfer message was received.
    Transfer(String),
    /// Worker process spawn or supervision failure.
    Worker(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Accept(msg) => write!(f, "accept: {msg}"),
            Self::Transfer(msg) => write!(f, "transfer: {msg}"),
            Self::Worker(msg) => write!(f, "worker: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
