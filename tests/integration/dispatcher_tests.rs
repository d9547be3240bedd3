//! Dispatcher loop over real loopback listeners.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};

use fdrelay::config::AcceptPolicy;
use fdrelay::dispatcher::listener::bind_addr;
use fdrelay::dispatcher::Dispatcher;
use fdrelay::transfer::{DispatchChannel, Receipt};
use fdrelay::AppError;

use super::test_helpers::{connect, DispatcherThread};

#[test]
fn accepted_connection_reaches_the_receiver() {
    let channel = DispatchChannel::open().expect("open");
    let receiver = channel.receiver().expect("receiver");
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::FailFast);

    let mut client = connect(dispatcher.addr);
    let Receipt::Handle(handle) = receiver.recv().expect("recv") else {
        panic!("expected a handle");
    };

    let mut served = TcpStream::from(handle);
    client.write_all(b"hi").expect("client write");
    let mut buf = [0u8; 2];
    served.read_exact(&mut buf).expect("served read");
    assert_eq!(&buf, b"hi");

    let summary = dispatcher.finish();
    assert_eq!(summary.dispatched, 1);
    assert_eq!(summary.accept_failures, 0);
}

#[test]
fn stop_closes_the_channel() {
    let channel = DispatchChannel::open().expect("open");
    let receiver = channel.receiver().expect("receiver");
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::FailFast);

    let summary = dispatcher.finish();
    assert_eq!(summary.dispatched, 0);
    assert!(matches!(receiver.recv().expect("recv"), Receipt::Closed));
}

#[test]
fn stop_is_idempotent() {
    let channel = DispatchChannel::open().expect("open");
    let _receiver = channel.receiver().expect("receiver");
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::FailFast);

    dispatcher.stop.stop();
    let summary = dispatcher.finish();
    assert_eq!(summary.dispatched, 0);
}

#[test]
fn every_listener_is_served() {
    let channel = DispatchChannel::open().expect("open");
    let receiver = channel.receiver().expect("receiver");
    let listeners = (0..2)
        .map(|_| bind_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), 16).expect("bind"))
        .collect();
    let dispatcher =
        Dispatcher::new(listeners, channel.into_sender(), AcceptPolicy::FailFast).expect("dispatcher");
    let addrs = dispatcher.local_addrs().expect("addrs");
    let stop = dispatcher.stop_handle().expect("stop");
    let thread = std::thread::spawn(move || dispatcher.run());

    let clients: Vec<_> = addrs.iter().map(|addr| connect(*addr)).collect();
    for _ in &clients {
        assert!(matches!(receiver.recv().expect("recv"), Receipt::Handle(_)));
    }

    stop.stop();
    let summary = thread.join().expect("thread").expect("run");
    assert_eq!(summary.dispatched, 2);
}

#[test]
fn transfer_failure_is_fatal() {
    let channel = DispatchChannel::open().expect("open");
    // No receiver: the shared end is closed with the channel.
    let dispatcher = DispatcherThread::start(channel.into_sender(), AcceptPolicy::LogAndContinue);

    let _client = connect(dispatcher.addr);
    let err = dispatcher
        .handle
        .join()
        .expect("dispatcher thread")
        .expect_err("transfer must fail");
    assert!(matches!(err, AppError::Transfer(_)));
}
