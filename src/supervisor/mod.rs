//! Process bootstrap: bind, start the worker pool, dispatch, stop.
//!
//! ```text
//!                 ┌──────────────────────────────┐
//!   clients ────▶ │ Dispatcher (supervisor proc) │
//!                 │  listeners: IPv4, IPv6-only  │
//!                 └──────────────┬───────────────┘
//!                                │ SCM_RIGHTS, one handle per message
//!                    shared receiving end (dup'ed)
//!               ┌────────────────┼────────────────┐
//!         ┌─────▼─────┐    ┌─────▼─────┐    ┌─────▼─────┐
//!         │ Worker 0  │    │ Worker 1  │    │ Worker N  │
//!         │ poll loop │    │ poll loop │    │ poll loop │
//!         └───────────┘    └───────────┘    └───────────┘
//! ```

pub mod monitor;
pub mod spawner;

use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use monitor::{describe_exit, spawn_worker_monitor, WorkerExit};
pub use spawner::{spawn_worker, WorkerProcess, WORKER_INDEX_ENV};

use crate::config::RelayConfig;
use crate::dispatcher::{listener, DispatchSummary, Dispatcher};
use crate::logging::LogFormat;
use crate::transfer::DispatchChannel;
use crate::{AppError, Result};

/// Outcome of a full supervisor run.
#[derive(Debug)]
pub struct RunSummary {
    /// Dispatcher counters.
    pub dispatch: DispatchSummary,
    /// One entry per worker process, in pool order.
    pub workers: Vec<WorkerExit>,
}

impl RunSummary {
    /// Handles received across all workers that reported.
    #[must_use]
    pub fn total_received(&self) -> u64 {
        self.workers
            .iter()
            .filter_map(|exit| exit.report)
            .map(|report| report.received)
            .sum()
    }
}

/// Owns the listeners between binding and dispatching.
#[derive(Debug)]
pub struct Supervisor {
    config: RelayConfig,
    listeners: Vec<TcpListener>,
    log_format: LogFormat,
}

impl Supervisor {
    /// Validate `config` and bind its listeners. Nothing is spawned yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid configuration and
    /// `AppError::Bind` if a listener cannot be bound.
    pub fn bind(config: RelayConfig, log_format: LogFormat) -> Result<Self> {
        config.validate()?;
        let listeners = listener::bind_all(&config.listener)?;
        Ok(Self {
            config,
            listeners,
            log_format,
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

    fn worker_executable(&self) -> Result<PathBuf> {
        match &self.config.worker.executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe()
                .map_err(|err| AppError::Worker(format!("failed to locate own executable: {err}"))),
        }
    }

    /// Spawn the pool and dispatch until `shutdown` fires or the dispatcher
    /// fails, then wait for every worker to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` if the pool cannot be started, or the
    /// dispatcher's fatal error once the workers have been collected.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary> {
        let exe = self.worker_executable()?;
        let grace = self.config.grace_period();
        let channel = DispatchChannel::open()?;
        let stopping = CancellationToken::new();

        let pool_size = usize::try_from(self.config.workers)
            .map_err(|err| AppError::Config(format!("workers out of range: {err}")))?;
        let mut monitors = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let receiver = channel.receiver()?;
            let worker = spawner::spawn_worker(
                index,
                &exe,
                receiver,
                &self.config.worker,
                self.log_format,
            )?;
            monitors.push(spawn_worker_monitor(worker, stopping.clone(), grace));
        }
        info!(workers = pool_size, "worker pool started");

        let dispatcher = Dispatcher::new(
            self.listeners,
            channel.into_sender(),
            self.config.listener.accept_failure,
        )?;
        let stop = dispatcher.stop_handle()?;

        let stop_on_shutdown = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown.cancelled().await;
                info!("shutdown requested, stopping dispatcher");
                stop.stop();
            }
        });

        let outcome = tokio::task::spawn_blocking(move || dispatcher.run())
            .await
            .unwrap_or_else(|err| Err(AppError::Worker(format!("dispatcher task failed: {err}"))));
        stop_on_shutdown.abort();

        // The dispatch channel is closed now; workers drain out through EOF.
        stopping.cancel();

        let workers: Vec<WorkerExit> = join_all(monitors)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(exit) => Some(exit),
                Err(err) => {
                    warn!(%err, "worker monitor task failed");
                    None
                }
            })
            .collect();

        let dispatch = outcome.map_err(|err| {
            error!(%err, "dispatcher terminated");
            err
        })?;

        let summary = RunSummary { dispatch, workers };
        info!(
            dispatched = summary.dispatch.dispatched,
            received = summary.total_received(),
            "worker pool stopped"
        );
        Ok(summary)
    }
}
