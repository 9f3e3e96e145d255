//! Rate limiter properties: the admission ceiling inside one window,
//! liveness after idling, and telemetry ring behavior under load.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use metricstream::limiter::telemetry::RING_CAPACITY;
use metricstream::limiter::RateLimiter;

#[test]
fn test_ceiling_holds_within_one_window() {
    let limiter = RateLimiter::new(5);

    let admitted = (0..20).filter(|_| limiter.allow("tenant-a")).count();
    assert_eq!(admitted, 5);
}

#[test]
fn test_client_is_admitted_again_after_idling_a_second() {
    let limiter = RateLimiter::new(1);
    assert!(limiter.allow("tenant-a"));
    assert!(!limiter.allow("tenant-a"));

    thread::sleep(Duration::from_millis(1100));
    assert!(limiter.allow("tenant-a"));
}

#[test]
fn test_many_distinct_clients_do_not_interfere() {
    let limiter = Arc::new(RateLimiter::new(2));
    let denied = Arc::new(AtomicUsize::new(0));

    // Clients spread across shards; each stays under its own ceiling, so no
    // request may be denied no matter how the threads interleave.
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let limiter = Arc::clone(&limiter);
            let denied = Arc::clone(&denied);
            thread::spawn(move || {
                for i in 0..50 {
                    let client = format!("client-{}-{}", worker, i);
                    if !limiter.allow(&client) {
                        denied.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread should not panic");
    }

    assert_eq!(denied.load(Ordering::Relaxed), 0);
}

#[test]
fn test_telemetry_preserves_per_client_decision_order() {
    let limiter = RateLimiter::new(2);
    limiter.allow("tenant-a");
    limiter.allow("tenant-a");
    limiter.allow("tenant-a");

    let mut decisions = Vec::new();
    let mut timestamps = Vec::new();
    limiter.flush_telemetry(|client, event| {
        assert_eq!(client, "tenant-a");
        decisions.push(event.allowed);
        timestamps.push(event.timestamp_ms);
    });

    assert_eq!(decisions, vec![true, true, false]);
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn test_overload_loses_samples_but_keeps_the_tail() {
    let limiter = RateLimiter::new(usize::MAX);

    let total = RING_CAPACITY + 300;
    for _ in 0..total {
        limiter.allow("tenant-a");
    }

    // The ring overwrote the oldest events; one flush reports at most the
    // ring capacity, all of them admissions.
    let mut seen = 0;
    limiter.flush_telemetry(|_, event| {
        assert!(event.allowed);
        seen += 1;
    });
    assert_eq!(seen, RING_CAPACITY);

    // The ring is fully drained after one flush.
    assert_eq!(limiter.flush_telemetry(|_, _| {}), 0);
}

#[test]
fn test_flush_runs_concurrently_with_admission() {
    let limiter = Arc::new(RateLimiter::new(usize::MAX));
    let stop = Arc::new(AtomicUsize::new(0));

    let producer = {
        let limiter = Arc::clone(&limiter);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while stop.load(Ordering::Relaxed) == 0 {
                limiter.allow("tenant-a");
            }
        })
    };

    // Concurrent flushes must never panic, deadlock, or report a denial for
    // a client with an unbounded ceiling.
    for _ in 0..20 {
        limiter.flush_telemetry(|_, event| assert!(event.allowed));
        thread::sleep(Duration::from_millis(5));
    }

    stop.store(1, Ordering::Relaxed);
    producer.join().expect("producer thread");
}
