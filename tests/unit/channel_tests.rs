use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use fdrelay::transfer::{DispatchChannel, Receipt};

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (client, server)
}

#[test]
fn receiver_gets_what_sender_sends() {
    let channel = DispatchChannel::open().expect("open");
    let receiver = channel.receiver().expect("receiver");
    let sender = channel.into_sender();

    let (mut client, server) = tcp_pair();
    sender.send(server).expect("send");

    let Receipt::Handle(handle) = receiver.recv().expect("recv") else {
        panic!("expected a handle");
    };
    let mut stream = TcpStream::from(handle);
    stream.write_all(b"hello").expect("write");
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).expect("read");
    assert_eq!(&buf, b"hello");
}

#[test]
fn duplicates_share_one_queue() {
    let channel = DispatchChannel::open().expect("open");
    let first = channel.receiver().expect("first receiver");
    let second = channel.receiver().expect("second receiver");
    let sender = channel.into_sender();
    first.set_nonblocking().expect("nonblocking");

    let (_client, server) = tcp_pair();
    sender.send(server).expect("send");

    assert!(matches!(first.recv().expect("first recv"), Receipt::Handle(_)));
    // The flag is shared, so the second duplicate does not block either.
    assert!(matches!(second.recv().expect("second recv"), Receipt::WouldBlock));
}

#[test]
fn dropping_the_sender_closes_every_receiver() {
    let channel = DispatchChannel::open().expect("open");
    let receivers: Vec<_> = (0..3).map(|_| channel.receiver().expect("receiver")).collect();
    drop(channel.into_sender());

    for receiver in &receivers {
        assert!(matches!(receiver.recv().expect("recv"), Receipt::Closed));
    }
}

#[test]
fn into_sender_closes_the_shared_original() {
    let channel = DispatchChannel::open().expect("open");
    let sender = channel.into_sender();

    // No receiver exists, so there is nobody left to take the handle.
    let (_client, server) = tcp_pair();
    assert!(sender.send(server).is_err());
}
