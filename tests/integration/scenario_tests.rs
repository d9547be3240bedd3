//! One dispatcher, three workers and five clients sending `ping`.

use std::time::Duration;

use fdrelay::config::AcceptPolicy;
use fdrelay::transfer::DispatchChannel;

use super::test_helpers::{assert_echo, connect, spawn_worker_thread, DispatcherThread};

const WORKERS: usize = 3;
const CLIENTS: usize = 5;

#[test]
fn five_clients_three_workers() {
    let channel = DispatchChannel::open().expect("open");
    let workers: Vec<_> = (0..WORKERS)
        .map(|_| spawn_worker_thread(channel.receiver().expect("receiver")))
        .collect();
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::FailFast);

    let mut clients: Vec<_> = (0..CLIENTS).map(|_| connect(dispatcher.addr)).collect();
    for client in &mut clients {
        assert_echo(client, b"ping");
    }
    // Every connection is still served after all of them were dispatched.
    for client in clients.iter_mut().rev() {
        assert_echo(client, b"ping again");
    }

    drop(clients);
    std::thread::sleep(Duration::from_millis(300));

    let summary = dispatcher.finish();
    assert_eq!(summary.dispatched, CLIENTS as u64);

    let reports: Vec<_> = workers
        .into_iter()
        .map(|worker| worker.join().expect("worker thread").expect("worker result"))
        .collect();
    let received: u64 = reports.iter().map(|report| report.received).sum();
    let closed: u64 = reports.iter().map(|report| report.closed).sum();
    let active: usize = reports.iter().map(|report| report.active).sum();
    assert_eq!(received, CLIENTS as u64, "each connection won exactly once");
    assert_eq!(closed, CLIENTS as u64);
    assert_eq!(active, 0);
    for (index, report) in reports.iter().enumerate() {
        assert_eq!(report.active, 0, "worker {index} kept connections open");
    }
}
