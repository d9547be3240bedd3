//! Concurrent echo load generator.
//!
//! Opens many client connections at once; each sends a random payload
//! repeatedly and checks that the identical bytes come back.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::{AppError, Result};

/// Shape of the generated load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    /// Concurrent client connections.
    pub clients: usize,
    /// Round trips per client.
    pub rounds: usize,
    /// Bytes per round trip.
    pub payload_bytes: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            clients: 1000,
            rounds: 1000,
            payload_bytes: 1024,
        }
    }
}

/// Totals across all clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// Clients that completed every round.
    pub clients: usize,
    /// Verified round trips.
    pub round_trips: u64,
    /// Bytes echoed back and verified.
    pub bytes_echoed: u64,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

/// Run `config` against the echo server at `addr`.
///
/// # Errors
///
/// Returns `AppError::Io` on the first client that fails to connect, loses
/// its connection or receives bytes that differ from what it sent.
pub async fn generate(addr: SocketAddr, config: LoadConfig) -> Result<LoadReport> {
    let started = Instant::now();
    let mut clients = JoinSet::new();
    for client in 0..config.clients {
        clients.spawn(run_client(client, addr, config.rounds, config.payload_bytes));
    }

    let mut report = LoadReport {
        clients: 0,
        round_trips: 0,
        bytes_echoed: 0,
        elapsed: Duration::ZERO,
    };
    while let Some(joined) = clients.join_next().await {
        let round_trips =
            joined.map_err(|err| AppError::Io(format!("load client task failed: {err}")))??;
        report.clients += 1;
        report.round_trips += round_trips;
        report.bytes_echoed += round_trips * u64::try_from(config.payload_bytes).unwrap_or(u64::MAX);
    }
    report.elapsed = started.elapsed();

    info!(
        clients = report.clients,
        round_trips = report.round_trips,
        elapsed_ms = report.elapsed.as_millis(),
        "load run complete"
    );
    Ok(report)
}

async fn run_client(client: usize, addr: SocketAddr, rounds: usize, payload_bytes: usize) -> Result<u64> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|err| AppError::Io(format!("client {client}: connect {addr}: {err}")))?;

    let mut data = vec![0u8; payload_bytes];
    fastrand::fill(&mut data);
    let mut echoed = vec![0u8; payload_bytes];

    let mut round_trips = 0u64;
    for round in 0..rounds {
        stream
            .write_all(&data)
            .await
            .map_err(|err| AppError::Io(format!("client {client}: write: {err}")))?;
        stream
            .read_exact(&mut echoed)
            .await
            .map_err(|err| AppError::Io(format!("client {client}: read: {err}")))?;
        if echoed != data {
            return Err(AppError::Io(format!(
                "client {client}: echo mismatch in round {round}"
            )));
        }
        round_trips += 1;
    }

    debug!(client, round_trips, "load client finished");
    Ok(round_trips)
}
