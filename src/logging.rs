//! Tracing subscriber setup shared by the server and worker processes.
//!
//! Logs always go to stderr: a worker's stdout carries its exit report.

use clap::ValueEnum;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, Result};

/// Log output format, passed as `--log-format`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Human readable lines. Default.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Command-line spelling, used when forwarding the format to workers.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info`.
///
/// # Errors
///
/// Returns `AppError::Config` if a global subscriber is already installed.
pub fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
