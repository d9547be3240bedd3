//! Worker process monitor.
//!
//! Each worker gets one monitoring task that waits for the process to exit
//! and collects the report it prints on stdout. A worker that dies while
//! dispatching is still live is logged and simply drops out of the race;
//! it is never replaced. Once dispatching stops, workers get a grace
//! period to notice EOF on the dispatch channel before they are killed.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::spawner::WorkerProcess;
use crate::worker::WorkerReport;

/// How a worker process ended.
#[derive(Debug)]
pub struct WorkerExit {
    /// Slot in the pool.
    pub index: usize,
    /// Process id, when known.
    pub pid: Option<u32>,
    /// Exit status, `None` if it could not be collected.
    pub status: Option<ExitStatus>,
    /// Report printed by the worker on a clean exit.
    pub report: Option<WorkerReport>,
}

impl WorkerExit {
    /// Whether the worker exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.is_some_and(|status| status.success())
    }
}

/// Spawn the monitoring task for `worker`.
///
/// `stopping` is cancelled by the supervisor once the dispatcher has left
/// its loop; from then on the worker has `grace` to exit on its own.
#[must_use]
pub fn spawn_worker_monitor(
    mut worker: WorkerProcess,
    stopping: CancellationToken,
    grace: Duration,
) -> JoinHandle<WorkerExit> {
    tokio::spawn(async move {
        let reader = worker.child.stdout.take().map(|out| tokio::spawn(read_report(out)));

        let status = tokio::select! {
            status = worker.child.wait() => status,
            () = grace_elapsed(&stopping, grace) => {
                warn!(index = worker.index, "worker outlived the shutdown grace period, killing");
                if let Err(err) = worker.child.kill().await {
                    warn!(index = worker.index, %err, "failed to kill worker");
                }
                worker.child.wait().await
            }
        };

        let status = match status {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(index = worker.index, %err, "failed to collect worker exit status");
                None
            }
        };
        let status_text = describe_exit(status);

        if stopping.is_cancelled() {
            info!(index = worker.index, status = %status_text, "worker exited");
        } else {
            warn!(
                index = worker.index,
                status = %status_text,
                "worker exited while dispatching, it will not be replaced"
            );
        }

        let report = match reader {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };
        if let Some(report) = report {
            info!(
                index = worker.index,
                pid = report.pid,
                received = report.received,
                closed = report.closed,
                active = report.active,
                "worker report"
            );
        }

        WorkerExit {
            index: worker.index,
            pid: worker.pid,
            status,
            report,
        }
    })
}

/// Human readable exit description.
#[must_use]
pub fn describe_exit(status: Option<ExitStatus>) -> String {
    status.map_or_else(
        || "status unknown".to_owned(),
        |s| {
            if s.success() {
                "exited normally (code 0)".to_owned()
            } else {
                s.code().map_or_else(
                    || "terminated by signal".to_owned(),
                    |c| format!("exited with code {c}"),
                )
            }
        },
    )
}

async fn grace_elapsed(stopping: &CancellationToken, grace: Duration) {
    stopping.cancelled().await;
    tokio::time::sleep(grace).await;
}

/// Keep the last line of worker stdout that parses as a report.
async fn read_report(stdout: ChildStdout) -> Option<WorkerReport> {
    let mut lines = BufReader::new(stdout).lines();
    let mut report = None;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Ok(parsed) = serde_json::from_str::<WorkerReport>(line.trim()) {
                    report = Some(parsed);
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%err, "failed to read worker stdout");
                break;
            }
        }
    }
    report
}
