//! Echo handler behavior against scripted in-memory connections.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

use fdrelay::worker::{ConnectionHandler, EchoHandler, Flow};

/// One scripted outcome per `read` call.
enum Step {
    Data(&'static [u8]),
    Fail(ErrorKind),
}

#[derive(Default)]
struct Scripted {
    reads: VecDeque<Step>,
    written: Vec<u8>,
    fail_writes: bool,
}

impl Scripted {
    fn new(reads: impl IntoIterator<Item = Step>) -> Self {
        Self {
            reads: reads.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            None => Ok(0),
            Some(Step::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Step::Data(&data[n..]));
                }
                Ok(n)
            }
            Some(Step::Fail(kind)) => Err(io::Error::from(kind)),
        }
    }
}

impl Write for Scripted {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn echoes_bytes_verbatim() {
    let mut conn = Scripted::new([Step::Data(b"ping")]);
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert_eq!(conn.written, b"ping");
}

#[test]
fn zero_byte_read_closes_without_writing() {
    let mut conn = Scripted::new([]);
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Closed);
    assert!(conn.written.is_empty());
}

#[test]
fn reads_at_most_one_chunk_per_event() {
    let mut conn = Scripted::new([Step::Data(b"abcdefgh")]);
    let mut handler = EchoHandler::new(4);

    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert_eq!(conn.written, b"abcd");
    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert_eq!(conn.written, b"abcdefgh");
    assert_eq!(handler.on_readable(&mut conn), Flow::Closed);
}

#[test]
fn order_is_preserved_across_events() {
    let mut conn = Scripted::new([Step::Data(b"one "), Step::Data(b"two "), Step::Data(b"three")]);
    let mut handler = EchoHandler::default();

    while handler.on_readable(&mut conn) == Flow::Open {}
    assert_eq!(conn.written, b"one two three");
}

#[test]
fn interrupted_read_is_retried() {
    let mut conn = Scripted::new([Step::Fail(ErrorKind::Interrupted), Step::Data(b"x")]);
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert_eq!(conn.written, b"x");
}

#[test]
fn spurious_wakeup_keeps_connection() {
    let mut conn = Scripted::new([Step::Fail(ErrorKind::WouldBlock)]);
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert!(conn.written.is_empty());
}

#[test]
fn read_error_closes_connection() {
    let mut conn = Scripted::new([Step::Fail(ErrorKind::ConnectionReset)]);
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Closed);
}

#[test]
fn write_error_closes_connection() {
    let mut conn = Scripted::new([Step::Data(b"lost")]);
    conn.fail_writes = true;
    let mut handler = EchoHandler::default();

    assert_eq!(handler.on_readable(&mut conn), Flow::Closed);
}

#[test]
fn zero_chunk_size_still_makes_progress() {
    let mut conn = Scripted::new([Step::Data(b"ab")]);
    let mut handler = EchoHandler::new(0);

    assert_eq!(handler.on_readable(&mut conn), Flow::Open);
    assert_eq!(conn.written, b"a");
}
