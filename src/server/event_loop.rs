use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::protocol::framing;
use crate::server::connection::{Connection, ReadOutcome};
use crate::server::worker_pool::WorkerPool;

/// Request handler executed on the worker pool, never on the loop thread.
/// Takes the framed request bytes, returns the full response bytes.
pub type RequestHandler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CLIENT_TOKEN: usize = 2;

/// Poll timeout. `stop()` is observed within one tick.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const EVENTS_CAPACITY: usize = 1024;

/// Single-threaded readiness loop serving every socket.
///
/// ## Architecture:
/// - One `mio::Poll` owns the listener and every accepted socket, all
///   non-blocking and edge-triggered.
/// - Read-ready sockets are drained into the connection buffer; complete
///   requests are framed out and dispatched to the worker pool.
/// - Workers hand response bytes back through a completion queue and wake
///   the loop with a `Waker`; only the loop thread writes to sockets.
/// - One request per connection is in flight at a time, so pipelined
///   requests on a connection answer in the order they were sent.
///
/// ## Failure policy:
/// - Any I/O error on a connection closes that connection only.
/// - Accept failures other than would-block are logged; the loop keeps
///   running.
/// - A failed registration of a new socket closes that socket and continues.
pub struct EventLoop {
    poll: Poll,
    waker: Arc<Waker>,
    pool: WorkerPool,
    shared: Arc<LoopShared>,
}

struct LoopShared {
    running: AtomicBool,
    /// Responses finished by workers, drained by the loop thread.
    completions: Mutex<Vec<(usize, Vec<u8>)>>,
}

/// Handle for stopping a running loop from another thread.
#[derive(Clone)]
pub struct EventLoopHandle {
    shared: Arc<LoopShared>,
    waker: Arc<Waker>,
}

impl EventLoopHandle {
    /// Idempotent. The loop exits within one polling tick and closes every
    /// tracked connection.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop for shutdown");
        }
    }
}

impl EventLoop {
    /// Create the readiness mechanism and the worker pool.
    ///
    /// # Errors
    /// Fails if the OS poller or its waker cannot be created; callers must
    /// not begin serving in that case.
    pub fn new(worker_threads: usize) -> Result<Self, ServiceError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        Ok(Self {
            poll,
            waker,
            pool: WorkerPool::new(worker_threads),
            shared: Arc::new(LoopShared {
                running: AtomicBool::new(true),
                completions: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            shared: Arc::clone(&self.shared),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Drive the loop until `stop()` is called. Takes ownership of the
    /// listener; consumes the loop. Worker threads join when the loop
    /// returns.
    pub fn run(
        mut self,
        listener: std::net::TcpListener,
        handler: RequestHandler,
    ) -> Result<(), ServiceError> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);
        self.poll
            .registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut connections: HashMap<usize, Connection> = HashMap::new();
        let mut next_token = FIRST_CLIENT_TOKEN;

        while self.shared.running.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => {
                        self.accept_clients(&mut listener, &mut connections, &mut next_token)
                    }
                    WAKER => {
                        // Completions are drained after the event batch.
                    }
                    Token(id) => {
                        if event.is_error() {
                            self.close_connection(&mut connections, id);
                            continue;
                        }
                        if event.is_readable() || event.is_read_closed() {
                            self.handle_read(&mut connections, id, &handler);
                        }
                        if event.is_writable() {
                            self.progress_write(&mut connections, id, &handler);
                        }
                    }
                }
            }

            self.drain_completions(&mut connections, &handler);
        }

        for (_, mut conn) in connections.drain() {
            let _ = self.poll.registry().deregister(&mut conn.stream);
        }
        debug!("event loop stopped");
        Ok(())
    }

    /// Drain the accept queue until it would block.
    fn accept_clients(
        &self,
        listener: &mut TcpListener,
        connections: &mut HashMap<usize, Connection>,
        next_token: &mut usize,
    ) {
        loop {
            match listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = *next_token;
                    *next_token += 1;
                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(token),
                        Interest::READABLE,
                    ) {
                        // Dropping the stream closes the socket.
                        warn!(error = %e, "failed to register accepted socket");
                        continue;
                    }
                    debug!(%peer, token, "accepted connection");
                    connections.insert(token, Connection::new(stream));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    /// Drain the socket, frame out complete requests, dispatch the next one.
    fn handle_read(
        &self,
        connections: &mut HashMap<usize, Connection>,
        token: usize,
        handler: &RequestHandler,
    ) {
        let close = {
            let conn = match connections.get_mut(&token) {
                Some(conn) => conn,
                None => return,
            };
            match conn.fill_read_buffer() {
                Ok(ReadOutcome::Open) => {
                    let mut framing_failed = false;
                    loop {
                        match framing::next_request(&mut conn.read_buf) {
                            Ok(Some(request)) => conn.pending.push_back(request),
                            Ok(None) => break,
                            Err(e) => {
                                debug!(token, error = %e, "framing error");
                                framing_failed = true;
                                break;
                            }
                        }
                    }
                    framing_failed
                }
                Ok(ReadOutcome::Eof) => true,
                Err(e) => {
                    debug!(token, error = %e, "read error");
                    true
                }
            }
        };

        if close {
            self.close_connection(connections, token);
            return;
        }
        if let Some(conn) = connections.get_mut(&token) {
            self.dispatch_next(conn, token, handler);
        }
    }

    /// Hand the next framed request on this connection to the worker pool.
    /// At most one request per connection is in flight.
    fn dispatch_next(&self, conn: &mut Connection, token: usize, handler: &RequestHandler) {
        if conn.in_flight {
            return;
        }
        let request = match conn.pending.pop_front() {
            Some(request) => request,
            None => return,
        };
        conn.in_flight = true;
        conn.keep_alive = request.keep_alive;

        let handler = Arc::clone(handler);
        let shared = Arc::clone(&self.shared);
        let waker = Arc::clone(&self.waker);
        self.pool.execute(move || {
            let response = handler.as_ref()(&request.data);
            shared.completions.lock().unwrap().push((token, response));
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake event loop");
            }
        });
    }

    /// Move finished responses into their connections' write buffers and
    /// start draining them. Responses for connections that closed while the
    /// request was in flight are dropped.
    fn drain_completions(
        &self,
        connections: &mut HashMap<usize, Connection>,
        handler: &RequestHandler,
    ) {
        let completed = {
            let mut queue = self.shared.completions.lock().unwrap();
            std::mem::take(&mut *queue)
        };
        for (token, response) in completed {
            {
                let conn = match connections.get_mut(&token) {
                    Some(conn) => conn,
                    None => continue,
                };
                conn.in_flight = false;
                conn.write_buf.extend_from_slice(&response);
            }
            self.progress_write(connections, token, handler);
        }
    }

    /// Drain the write buffer. On completion: keep-alive dispatches the next
    /// pipelined request and falls back to read interest, anything else
    /// closes. On would-block the socket keeps write interest.
    fn progress_write(
        &self,
        connections: &mut HashMap<usize, Connection>,
        token: usize,
        handler: &RequestHandler,
    ) {
        let mut close = false;
        if let Some(conn) = connections.get_mut(&token) {
            match conn.flush_write_buffer() {
                Ok(true) => {
                    if conn.keep_alive {
                        self.dispatch_next(conn, token, handler);
                        self.update_interest(conn, token, Interest::READABLE);
                    } else {
                        close = true;
                    }
                }
                Ok(false) => {
                    self.update_interest(conn, token, Interest::READABLE | Interest::WRITABLE);
                }
                Err(e) => {
                    debug!(token, error = %e, "write error");
                    close = true;
                }
            }
        }
        if close {
            self.close_connection(connections, token);
        }
    }

    fn update_interest(&self, conn: &mut Connection, token: usize, interest: Interest) {
        if conn.interest == interest {
            return;
        }
        match self
            .poll
            .registry()
            .reregister(&mut conn.stream, Token(token), interest)
        {
            Ok(()) => conn.interest = interest,
            Err(e) => warn!(token, error = %e, "failed to update interest"),
        }
    }

    fn close_connection(&self, connections: &mut HashMap<usize, Connection>, token: usize) {
        if let Some(mut conn) = connections.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            debug!(token, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    fn start_loop(port: u16, response: &'static [u8]) -> (EventLoopHandle, thread::JoinHandle<()>) {
        let event_loop = EventLoop::new(2).expect("event loop init");
        let handle = event_loop.handle();
        let listener =
            std::net::TcpListener::bind(("127.0.0.1", port)).expect("bind test port");
        let join = thread::spawn(move || {
            let handler: RequestHandler = Arc::new(move |_request| response.to_vec());
            event_loop.run(listener, handler).expect("event loop run");
        });
        thread::sleep(Duration::from_millis(100));
        (handle, join)
    }

    #[test]
    fn test_serves_request_and_keeps_connection_open() {
        let response: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok";
        let (handle, join) = start_loop(19180, response);

        let mut stream = TcpStream::connect("127.0.0.1:19180").expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();

        let mut buf = vec![0u8; response.len()];
        stream.read_exact(&mut buf).expect("read response");
        assert_eq!(buf, response);

        // Connection stays open for another round trip.
        stream
            .write_all(b"GET /health HTTP/1.1\r\nConnection: keep-alive\r\n\r\n")
            .unwrap();
        stream.read_exact(&mut buf).expect("read second response");
        assert_eq!(buf, response);

        handle.stop();
        join.join().expect("loop thread join");
    }

    #[test]
    fn test_closes_connection_without_keep_alive() {
        let response: &[u8] =
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
        let (handle, join) = start_loop(19181, response);

        let mut stream = TcpStream::connect("127.0.0.1:19181").expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\n\r\n")
            .unwrap();

        // Without keep-alive the server closes after the response, so
        // read_to_end observes EOF.
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).expect("read to eof");
        assert_eq!(buf, response);

        handle.stop();
        join.join().expect("loop thread join");
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let (handle, join) = start_loop(19182, b"x");
        handle.stop();
        handle.stop();
        join.join().expect("loop thread join");
    }
}
