#![forbid(unsafe_code)]

//! `fdrelay-load`: drive an echo server with many concurrent clients.

use clap::Parser;
use tracing::info;

use fdrelay::loadgen::{generate, LoadConfig};
use fdrelay::logging::{init_tracing, LogFormat};
use fdrelay::{AppError, Result};

#[derive(Debug, Parser)]
#[command(name = "fdrelay-load", about = "Echo load generator", version, long_about = None)]
struct Cli {
    /// Server address, `host:port`.
    #[arg(default_value = "127.0.0.1:8200")]
    address: String,

    /// Concurrent client connections.
    #[arg(long, default_value_t = 1000)]
    clients: usize,

    /// Round trips per client.
    #[arg(long, default_value_t = 1000)]
    rounds: usize,

    /// Payload bytes per round trip.
    #[arg(long, default_value_t = 1024)]
    payload: usize,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let addr = tokio::net::lookup_host(&args.address)
        .await
        .map_err(|err| AppError::Config(format!("cannot resolve {}: {err}", args.address)))?
        .next()
        .ok_or_else(|| AppError::Config(format!("no address for {}", args.address)))?;

    let config = LoadConfig {
        clients: args.clients,
        rounds: args.rounds,
        payload_bytes: args.payload,
    };
    info!(%addr, clients = config.clients, rounds = config.rounds, "starting load run");

    let report = generate(addr, config).await?;
    let secs = report.elapsed.as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let rate = if secs > 0.0 {
        report.round_trips as f64 / secs
    } else {
        0.0
    };
    println!(
        "{} clients, {} round trips, {} bytes in {:.3}s ({rate:.0} round trips/s)",
        report.clients, report.round_trips, report.bytes_echoed, secs
    );
    Ok(())
}
