use std::collections::VecDeque;
use std::io::{self, Read, Write};

use mio::net::TcpStream;
use mio::Interest;

use crate::protocol::framing::FramedRequest;

const READ_CHUNK: usize = 4096;

/// Outcome of draining a readable socket.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Socket drained to would-block; connection stays open.
    Open,
    /// Peer closed its end of the connection.
    Eof,
}

/// Per-socket connection state, owned by the event-loop thread.
///
/// Buffers are touched only from the loop thread. Workers hand response
/// bytes back through the loop's completion queue; they never see this
/// struct.
///
/// ## Pipelining:
/// Complete requests framed out of `read_buf` wait in `pending`. Exactly one
/// request per connection is dispatched to the worker pool at a time
/// (`in_flight`); the next one goes out when the previous response has been
/// enqueued. That serialises responses in request order.
pub struct Connection {
    pub stream: TcpStream,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    /// Keep-alive flag of the request currently in flight.
    pub keep_alive: bool,
    pub pending: VecDeque<FramedRequest>,
    pub in_flight: bool,
    /// Interest currently registered with the poller.
    pub interest: Interest,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            read_buf: Vec::new(),
            write_buf: Vec::new(),
            keep_alive: false,
            pending: VecDeque::new(),
            in_flight: false,
            interest: Interest::READABLE,
        }
    }

    /// Drain the socket into `read_buf` until it would block.
    /// Edge-triggered readiness requires reading to exhaustion on each wake.
    pub fn fill_read_buffer(&mut self) -> io::Result<ReadOutcome> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Open)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write as much of `write_buf` as the socket accepts.
    /// Returns true when the buffer emptied, false on would-block.
    pub fn flush_write_buffer(&mut self) -> io::Result<bool> {
        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ))
                }
                Ok(n) => {
                    self.write_buf.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}
