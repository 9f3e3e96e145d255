pub mod telemetry;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::hash::stable_hash;

pub use telemetry::{TelemetryEvent, TelemetryRing};

/// Number of lock shards. Prime, so `hash mod SHARD_COUNT` spreads clients
/// evenly; the exact value is not load-bearing beyond being ~10^4.
pub const SHARD_COUNT: usize = 10_007;

/// The sliding admission window.
const WINDOW: Duration = Duration::from_secs(1);

struct ClientState {
    /// Steady-clock timestamps of admitted requests inside the window,
    /// oldest first. Length == admission count in the last second.
    admitted: VecDeque<Instant>,
    ring: Arc<TelemetryRing>,
}

/// Per-client sliding-window rate limiter.
///
/// ## Locking:
/// - State lives in a fixed pool of `SHARD_COUNT` mutex-guarded maps; a
///   client's shard is `stable_hash(id) mod SHARD_COUNT`. The pool caps
///   memory regardless of client count.
/// - Admission holds exactly one shard lock. Telemetry is recorded after the
///   lock is released, through the client's lock-free ring.
/// - A roster of `(client, ring)` pairs behind its own mutex lets the flush
///   path enumerate clients without touching any shard. The insert path
///   locks shard then roster; the flush path locks roster only, so the two
///   never cycle.
pub struct RateLimiter {
    max_per_window: usize,
    epoch: Instant,
    shards: Vec<Mutex<HashMap<String, ClientState>>>,
    roster: Mutex<Vec<(String, Arc<TelemetryRing>)>>,
}

impl RateLimiter {
    pub fn new(max_requests_per_second: usize) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            max_per_window: max_requests_per_second,
            epoch: Instant::now(),
            shards,
            roster: Mutex::new(Vec::new()),
        }
    }

    /// Decide admission for one request from `client_id`.
    ///
    /// Under the shard lock: drop window entries older than one second, then
    /// admit iff fewer than the ceiling remain, recording `now` on admit.
    /// The decision is then published to the client's telemetry ring with no
    /// lock held.
    pub fn allow(&self, client_id: &str) -> bool {
        let now = Instant::now();

        let (allowed, ring) = {
            let shard = &self.shards[(stable_hash(client_id) as usize) % SHARD_COUNT];
            let mut clients = shard.lock().unwrap();

            let state = clients.entry(client_id.to_string()).or_insert_with(|| {
                let ring = Arc::new(TelemetryRing::new());
                self.roster
                    .lock()
                    .unwrap()
                    .push((client_id.to_string(), Arc::clone(&ring)));
                ClientState {
                    admitted: VecDeque::new(),
                    ring,
                }
            });

            while let Some(&oldest) = state.admitted.front() {
                if now.duration_since(oldest) >= WINDOW {
                    state.admitted.pop_front();
                } else {
                    break;
                }
            }

            let allowed = if state.admitted.len() < self.max_per_window {
                state.admitted.push_back(now);
                true
            } else {
                false
            };
            (allowed, Arc::clone(&state.ring))
        };

        let timestamp_ms = now.duration_since(self.epoch).as_millis() as u64;
        ring.record(timestamp_ms, allowed);

        allowed
    }

    /// Drain every client's telemetry ring, emitting one record per
    /// admission decision. Runs on a separate cadence from admission; only
    /// the roster lock is taken, never a shard lock.
    ///
    /// Returns the number of events emitted.
    pub fn flush_telemetry(&self, mut emit: impl FnMut(&str, TelemetryEvent)) -> usize {
        let clients: Vec<(String, Arc<TelemetryRing>)> = {
            let roster = self.roster.lock().unwrap();
            roster.clone()
        };

        let mut emitted = 0;
        for (client_id, ring) in &clients {
            emitted += ring.drain(|event| emit(client_id, event));
        }
        emitted
    }
}
