//! Worker process spawner.
//!
//! Workers are the relay binary itself started with the hidden `worker`
//! subcommand. The worker's duplicate of the shared dispatch channel end
//! becomes its stdin; the supervisor's copy is closed as soon as the spawn
//! returns. Stdout is piped so the supervisor can collect the exit report.
//!
//! Each worker leads its own process group, so a terminal Ctrl-C reaches
//! only the supervisor. Workers leave through EOF on the dispatch channel.

use std::os::fd::OwnedFd;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{info, info_span};

use crate::config::WorkerConfig;
use crate::logging::LogFormat;
use crate::transfer::ChannelReceiver;
use crate::{AppError, Result};

/// Environment variable carrying the worker's slot in the pool.
pub const WORKER_INDEX_ENV: &str = "FDRELAY_WORKER_INDEX";

/// A spawned worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    /// Slot in the pool, `0..workers`.
    pub index: usize,
    /// Process id, if the child was still running right after spawn.
    pub pid: Option<u32>,
    /// The child process.
    pub child: Child,
}

/// Spawn worker `index` with `receiver` as its dispatch channel.
///
/// # Errors
///
/// Returns `AppError::Worker` if the process cannot be started.
pub fn spawn_worker(
    index: usize,
    exe: &Path,
    receiver: ChannelReceiver,
    config: &WorkerConfig,
    log_format: LogFormat,
) -> Result<WorkerProcess> {
    let span = info_span!("spawn_worker", index);
    let _guard = span.enter();

    let mut cmd = Command::new(exe);
    cmd.arg("--log-format")
        .arg(log_format.as_arg())
        .arg("worker")
        .arg("--chunk-size")
        .arg(config.chunk_size.to_string())
        .env(WORKER_INDEX_ENV, index.to_string())
        .stdin(Stdio::from(OwnedFd::from(receiver)))
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .process_group(0)
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|err| {
        AppError::Worker(format!(
            "failed to spawn worker {index} from {}: {err}",
            exe.display()
        ))
    })?;
    drop(cmd);

    let pid = child.id();
    info!(pid = pid.unwrap_or(0), exe = %exe.display(), "worker spawned");

    Ok(WorkerProcess { index, pid, child })
}
