use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads draining a FIFO task queue.
///
/// ## Semantics:
/// - `execute` never blocks and never rejects; the queue is unbounded.
///   Backpressure is created upstream by the kernel accept queue filling
///   when workers cannot keep up.
/// - Workers exit only on pool destruction: the running flag is cleared and
///   all waiters are woken. Tasks still queued at that point are drained
///   before the workers exit.
/// - No per-task cancellation.
///
/// ## Thread safety:
/// - The queue is guarded by one mutex; workers park on a condvar while it
///   is empty.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

struct PoolState {
    queue: VecDeque<Job>,
    running: bool,
}

impl WorkerPool {
    /// Spawn `size` worker threads. `size` is clamped to at least 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                running: true,
            }),
            available: Condvar::new(),
        });

        let workers = (0..size)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("worker-{}", i))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Queue a task for execution. Never blocks on the workers.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        state.queue.push_back(Box::new(job));
        drop(state);
        self.shared.available.notify_one();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break Some(job);
                }
                if !state.running {
                    break None;
                }
                state = shared.available.wait(state).unwrap();
            }
        };

        match job {
            Some(job) => job(),
            None => return,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.running = false;
        }
        self.shared.available.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
