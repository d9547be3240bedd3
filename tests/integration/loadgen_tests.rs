use fdrelay::config::AcceptPolicy;
use fdrelay::loadgen::{generate, LoadConfig};
use fdrelay::transfer::DispatchChannel;
use fdrelay::AppError;

use super::test_helpers::{spawn_worker_thread, DispatcherThread};

#[tokio::test(flavor = "multi_thread")]
async fn load_run_verifies_every_round_trip() {
    let channel = DispatchChannel::open().expect("open");
    let workers: Vec<_> = (0..2)
        .map(|_| spawn_worker_thread(channel.receiver().expect("receiver")))
        .collect();
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::FailFast);

    let config = LoadConfig {
        clients: 8,
        rounds: 20,
        payload_bytes: 256,
    };
    let report = generate(dispatcher.addr, config).await.expect("load run");
    assert_eq!(report.clients, 8);
    assert_eq!(report.round_trips, 160);
    assert_eq!(report.bytes_echoed, 160 * 256);

    let summary = tokio::task::spawn_blocking(move || dispatcher.finish())
        .await
        .expect("finish");
    assert_eq!(summary.dispatched, 8);
    for worker in workers {
        worker.join().expect("worker thread").expect("worker result");
    }
}

#[tokio::test]
async fn refused_connection_is_an_error() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr");

    let config = LoadConfig {
        clients: 1,
        rounds: 1,
        payload_bytes: 8,
    };
    let err = generate(addr, config).await.expect_err("nothing listens");
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("connect")));
}

#[test]
fn defaults_match_the_reference_load() {
    let config = LoadConfig::default();
    assert_eq!((config.clients, config.rounds, config.payload_bytes), (1000, 1000, 1024));
}
