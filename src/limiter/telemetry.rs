use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Ring capacity per client. Once the producer outruns the reader by this
/// many events, unread entries are silently overwritten: sampling loss is
/// the documented trade for never blocking admission.
pub const RING_CAPACITY: usize = 1000;

/// One admission decision, as recorded for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryEvent {
    /// Steady-clock milliseconds since the limiter was created.
    pub timestamp_ms: u64,
    pub allowed: bool,
}

/// Lock-free single-producer/single-reader telemetry ring.
///
/// Each slot packs `(timestamp_ms << 1) | allowed` into one `AtomicU64`, so
/// an event is published with a single release store of `write_index` after
/// the slot write. The reader acquires both indices, reads the live slots,
/// and releases the new `read_index`.
///
/// ## Invariants:
/// - `write_index` and `read_index` are monotonically non-decreasing.
/// - `read_index <= write_index` at all times.
///
/// Concurrent producers for the same client degrade to additional sampling
/// loss (a slot or an index bump can be lost), never to corruption.
pub struct TelemetryRing {
    slots: Box<[AtomicU64]>,
    write_index: AtomicUsize,
    read_index: AtomicUsize,
}

impl TelemetryRing {
    pub fn new() -> Self {
        let slots = (0..RING_CAPACITY).map(|_| AtomicU64::new(0)).collect();
        Self {
            slots,
            write_index: AtomicUsize::new(0),
            read_index: AtomicUsize::new(0),
        }
    }

    /// Record one decision. Producer side of the ring: slot write first,
    /// then the index published with release so the reader's acquire load
    /// observes the slot contents.
    pub fn record(&self, timestamp_ms: u64, allowed: bool) {
        let write = self.write_index.load(Ordering::Relaxed);
        self.slots[write % RING_CAPACITY].store(pack(timestamp_ms, allowed), Ordering::Relaxed);
        self.write_index.store(write + 1, Ordering::Release);
    }

    /// Drain unread events into `emit`, oldest first, and advance
    /// `read_index`. A reader lapped by more than the ring capacity observes
    /// only the most recent `RING_CAPACITY` events.
    ///
    /// Returns the number of events emitted.
    pub fn drain(&self, mut emit: impl FnMut(TelemetryEvent)) -> usize {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);
        if write == read {
            return 0;
        }

        let start = if write - read > RING_CAPACITY {
            write - RING_CAPACITY
        } else {
            read
        };
        for i in start..write {
            emit(unpack(self.slots[i % RING_CAPACITY].load(Ordering::Relaxed)));
        }

        self.read_index.store(write, Ordering::Release);
        write - start
    }

    #[cfg(test)]
    pub fn indices(&self) -> (usize, usize) {
        (
            self.read_index.load(Ordering::Acquire),
            self.write_index.load(Ordering::Acquire),
        )
    }
}

impl Default for TelemetryRing {
    fn default() -> Self {
        Self::new()
    }
}

fn pack(timestamp_ms: u64, allowed: bool) -> u64 {
    (timestamp_ms << 1) | u64::from(allowed)
}

fn unpack(raw: u64) -> TelemetryEvent {
    TelemetryEvent {
        timestamp_ms: raw >> 1,
        allowed: raw & 1 == 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_round_trip_in_order() {
        let ring = TelemetryRing::new();
        ring.record(10, true);
        ring.record(11, false);
        ring.record(12, true);

        let mut events = Vec::new();
        let drained = ring.drain(|event| events.push(event));
        assert_eq!(drained, 3);
        assert_eq!(
            events,
            vec![
                TelemetryEvent { timestamp_ms: 10, allowed: true },
                TelemetryEvent { timestamp_ms: 11, allowed: false },
                TelemetryEvent { timestamp_ms: 12, allowed: true },
            ]
        );

        // Nothing left after a drain.
        assert_eq!(ring.drain(|_| {}), 0);
    }

    #[test]
    fn test_indices_are_monotonic_and_ordered() {
        let ring = TelemetryRing::new();
        let (read, write) = ring.indices();
        assert_eq!((read, write), (0, 0));

        ring.record(1, true);
        ring.record(2, true);
        let (read, write) = ring.indices();
        assert!(read <= write);
        assert_eq!(write, 2);

        ring.drain(|_| {});
        let (read_after, write_after) = ring.indices();
        assert!(read_after >= read && write_after >= write);
        assert!(read_after <= write_after);
    }

    #[test]
    fn test_overrun_keeps_only_most_recent_events() {
        let ring = TelemetryRing::new();
        for i in 0..(RING_CAPACITY as u64 + 500) {
            ring.record(i, true);
        }

        let mut events = Vec::new();
        let drained = ring.drain(|event| events.push(event));
        assert_eq!(drained, RING_CAPACITY);
        assert_eq!(events.first().map(|e| e.timestamp_ms), Some(500));
        assert_eq!(
            events.last().map(|e| e.timestamp_ms),
            Some(RING_CAPACITY as u64 + 499)
        );
    }
}
