use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::ingest::metric::MetricBatch;
use crate::queue::sink::MetricSink;

/// Background writer draining accepted batches into the sink.
///
/// ## Semantics:
/// - `enqueue` always succeeds and wakes the writer; the handoff queue is
///   unbounded.
/// - The single writer thread serialises sink calls, so batches admitted
///   from one client reach their partition in enqueue order.
/// - The queue lock is released around every sink call; producers are never
///   blocked on I/O.
/// - Sink failures are logged and counted; the batch is dropped. The HTTP
///   response was already sent, so this is at-most-once from the client's
///   view and at-least-once into the log.
/// - `stop` is idempotent; the thread drains everything still queued, asks
///   the sink to flush, and exits.
pub struct BatchWriter {
    shared: Arc<WriterShared>,
    thread: Option<JoinHandle<()>>,
}

struct WriterShared {
    queue: Mutex<VecDeque<(MetricBatch, String)>>,
    ready: Condvar,
    running: AtomicBool,
    sink: Arc<dyn MetricSink>,
    failures: AtomicU64,
}

/// Producer-side handle to the writer's handoff queue. Cheap to clone; used
/// by worker threads so the service can keep ownership of the writer itself
/// for shutdown.
#[derive(Clone)]
pub struct WriterHandle {
    shared: Arc<WriterShared>,
}

impl WriterHandle {
    pub fn enqueue(&self, batch: MetricBatch, client_id: String) {
        self.shared.push(batch, client_id);
    }
}

impl WriterShared {
    fn push(&self, batch: MetricBatch, client_id: String) {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back((batch, client_id));
        drop(queue);
        self.ready.notify_one();
    }
}

impl BatchWriter {
    pub fn start(sink: Arc<dyn MetricSink>) -> Self {
        let shared = Arc::new(WriterShared {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            running: AtomicBool::new(true),
            sink,
            failures: AtomicU64::new(0),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("batch-writer".to_string())
                .spawn(move || writer_loop(&shared))
                .expect("failed to spawn writer thread")
        };

        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Hand a batch to the writer. Never blocks on sink I/O.
    pub fn enqueue(&self, batch: MetricBatch, client_id: String) {
        self.shared.push(batch, client_id);
    }

    pub fn queue_handle(&self) -> WriterHandle {
        WriterHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of batches dropped on sink failure.
    pub fn write_failures(&self) -> u64 {
        self.shared.failures.load(Ordering::Relaxed)
    }

    /// Idempotent. Blocks until the writer has drained and exited.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.ready.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn writer_loop(shared: &WriterShared) {
    loop {
        let entry = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(entry) = queue.pop_front() {
                    break Some(entry);
                }
                if !shared.running.load(Ordering::Acquire) {
                    break None;
                }
                queue = shared.ready.wait(queue).unwrap();
            }
            // Lock dropped here; the sink call below runs without it.
        };

        match entry {
            Some((batch, client_id)) => write_batch(shared, &batch, &client_id),
            None => {
                if let Err(e) = shared.sink.flush() {
                    error!(error = %e, "sink flush failed on shutdown");
                }
                return;
            }
        }
    }
}

fn write_batch(shared: &WriterShared, batch: &MetricBatch, client_id: &str) {
    let payload = match batch.to_log_payload() {
        Ok(payload) => payload,
        Err(e) => {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            error!(client_id, error = %e, "failed to serialize batch");
            return;
        }
    };

    match shared.sink.produce(client_id, &payload) {
        Ok((partition, offset)) => {
            debug!(
                client_id,
                partition,
                offset,
                metrics = batch.len(),
                "queued metrics batch"
            );
        }
        Err(e) => {
            shared.failures.fetch_add(1, Ordering::Relaxed);
            error!(client_id, error = %e, "failed to write batch to sink");
        }
    }
}
