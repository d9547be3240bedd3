//! Relay configuration parsing and validation.
//!
//! Every key carries a default, so an empty document yields the
//! reference setup: three workers behind port 8200 on both address
//! families.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Echo read size used when the configuration does not set one.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// What the dispatcher does when `accept` fails.
#[derive(Debug, Copy, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptPolicy {
    /// Any accept failure terminates the dispatcher.
    #[default]
    FailFast,
    /// Log the failure and keep dispatching.
    LogAndContinue,
}

/// Listening socket settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ListenerConfig {
    /// TCP port shared by both address families; 0 picks ephemeral ports.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind `0.0.0.0:port`.
    #[serde(default = "default_true")]
    pub ipv4: bool,
    /// Bind `[::]:port` as an IPv6-only socket.
    #[serde(default = "default_true")]
    pub ipv6: bool,
    /// Listen backlog; clamped to the platform maximum.
    #[serde(default = "default_backlog")]
    pub backlog: u16,
    /// Accept failure handling.
    #[serde(default)]
    pub accept_failure: AcceptPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            ipv4: true,
            ipv6: true,
            backlog: default_backlog(),
            accept_failure: AcceptPolicy::default(),
        }
    }
}

/// Worker process settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Bytes read per readiness event on a connection.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Binary started in worker mode; defaults to the running executable.
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            executable: None,
        }
    }
}

/// Shutdown behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ShutdownConfig {
    /// Seconds workers get to exit after dispatching stops.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
        }
    }
}

fn default_port() -> u16 {
    8200
}

fn default_true() -> bool {
    true
}

fn default_backlog() -> u16 {
    255
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_workers() -> u32 {
    3
}

/// Relay configuration parsed from `fdrelay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Fixed number of worker processes.
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// Listening sockets.
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Worker processes.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Shutdown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            listener: ListenerConfig::default(),
            worker: WorkerConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Grace period granted to workers once dispatching stops.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown.grace_seconds)
    }

    /// Check the invariants the relay relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AppError::Config("workers must be greater than zero".into()));
        }

        if !self.listener.ipv4 && !self.listener.ipv6 {
            return Err(AppError::Config(
                "at least one of listener.ipv4 or listener.ipv6 must be enabled".into(),
            ));
        }

        if self.listener.backlog == 0 {
            return Err(AppError::Config(
                "listener.backlog must be greater than zero".into(),
            ));
        }

        if self.worker.chunk_size == 0 {
            return Err(AppError::Config(
                "worker.chunk_size must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
