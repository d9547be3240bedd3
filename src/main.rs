#![forbid(unsafe_code)]

//! `fdrelay`: pre-forked echo server binary.
//!
//! `fdrelay serve` binds the listeners, starts the worker pool and
//! dispatches until SIGINT or SIGTERM. The hidden `fdrelay worker`
//! subcommand is how the server starts its own worker processes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use fdrelay::logging::{init_tracing, LogFormat};
use fdrelay::supervisor::Supervisor;
use fdrelay::worker::run_worker_process;
use fdrelay::{AppError, RelayConfig, Result};

#[derive(Debug, Parser)]
#[command(name = "fdrelay", about = "Pre-forked TCP echo server", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bind the listeners and serve with a pool of worker processes.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override `listener.port`.
        #[arg(long)]
        port: Option<u16>,

        /// Override `workers`.
        #[arg(long)]
        workers: Option<u32>,
    },

    /// Run one worker on the dispatch channel inherited as stdin.
    #[command(hide = true)]
    Worker {
        /// Bytes read per readiness event.
        #[arg(long, default_value_t = fdrelay::config::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    match args.command {
        Command::Worker { chunk_size } => run_worker_process(chunk_size).map(|_| ()),
        Command::Serve {
            config,
            port,
            workers,
        } => {
            let mut config = match config {
                Some(path) => RelayConfig::load_from_path(path)?,
                None => RelayConfig::default(),
            };
            if let Some(port) = port {
                config.listener.port = port;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            info!("fdrelay server bootstrap");

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
                .block_on(serve(config, args.log_format))
        }
    }
}

async fn serve(config: RelayConfig, log_format: LogFormat) -> Result<()> {
    let supervisor = Supervisor::bind(config, log_format)?;
    for addr in supervisor.local_addrs()? {
        info!(address = %addr, "accepting connections");
    }

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    let outcome = supervisor.run(shutdown).await;
    signal_task.abort();

    match outcome {
        Ok(summary) => {
            info!(
                dispatched = summary.dispatch.dispatched,
                accept_failures = summary.dispatch.accept_failures,
                workers = summary.workers.len(),
                "fdrelay shut down"
            );
            Ok(())
        }
        Err(err) => {
            error!(%err, "fdrelay terminated");
            Err(err)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
            let _ = ctrl_c.await;
        }
    }
}
