//! Integration tests for the partitioned log and its consumer:
//! offset contiguity, durable offset agreement, partition determinism,
//! restart behavior, and consumer-group resume semantics.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metricstream::hash::partition_for_key;
use metricstream::queue::log::format_offset;
use metricstream::queue::{ConsumedMessage, PartitionedLog, QueueConsumer};
use tempfile::TempDir;

/// Spin until `predicate` holds or the deadline passes.
fn wait_for(predicate: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

#[test]
fn test_msg_files_match_offset_file_after_produces() {
    let dir = TempDir::new().unwrap();
    let log = PartitionedLog::open(dir.path(), 3).unwrap();

    for i in 0..30 {
        log.produce(&format!("client-{}", i % 5), b"payload").unwrap();
    }

    for partition in 0..3 {
        let partition_dir = dir.path().join(format!("partition-{}", partition));
        let last = log.last_offset(partition).unwrap();

        let mut names: Vec<String> = fs::read_dir(&partition_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| name.ends_with(".msg"))
            .collect();
        names.sort();

        let expected: Vec<String> = (1..=last)
            .map(|offset| format!("{}.msg", format_offset(offset)))
            .collect();
        assert_eq!(names, expected, "partition {} has gaps", partition);

        if last > 0 {
            let recorded: u64 = fs::read_to_string(partition_dir.join("offset.txt"))
                .unwrap()
                .trim()
                .parse()
                .unwrap();
            assert_eq!(recorded, last);
        }
    }
}

#[test]
fn test_partition_assignment_is_stable_across_instances() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let log_a = PartitionedLog::open(dir_a.path(), 4).unwrap();
    let log_b = PartitionedLog::open(dir_b.path(), 4).unwrap();

    for key in ["default", "tenant-a", "tenant-b", "tenant-c"] {
        assert_eq!(log_a.partition_for(key), log_b.partition_for(key));
        assert_eq!(log_a.partition_for(key), partition_for_key(key, 4));
    }
}

#[test]
fn test_restart_continues_offsets_without_gaps() {
    let dir = TempDir::new().unwrap();
    let key = "tenant-a";

    {
        let log = PartitionedLog::open(dir.path(), 2).unwrap();
        for _ in 0..3 {
            log.produce(key, b"before-restart").unwrap();
        }
    }

    let log = PartitionedLog::open(dir.path(), 2).unwrap();
    let (partition, offset) = log.produce(key, b"after-restart").unwrap();
    assert_eq!(offset, 4);
    assert_eq!(partition, log.partition_for(key));
}

#[test]
fn test_consumer_delivers_in_offset_order() {
    let dir = TempDir::new().unwrap();
    let offsets = TempDir::new().unwrap();
    let log = PartitionedLog::open(dir.path(), 1).unwrap();

    for i in 1..=5u32 {
        log.produce("key", format!("message-{}", i).as_bytes()).unwrap();
    }

    let delivered: Arc<Mutex<Vec<ConsumedMessage>>> = Arc::new(Mutex::new(Vec::new()));
    let mut consumer = QueueConsumer::new(dir.path(), offsets.path(), "group-a", 1).unwrap();
    {
        let delivered = Arc::clone(&delivered);
        consumer.start(Arc::new(move |message| {
            delivered.lock().unwrap().push(message);
        }));
    }

    assert!(wait_for(
        || delivered.lock().unwrap().len() == 5,
        Duration::from_secs(3)
    ));
    consumer.stop();

    let delivered = delivered.lock().unwrap();
    for (i, message) in delivered.iter().enumerate() {
        assert_eq!(message.offset, i as u64 + 1);
        assert_eq!(message.data, format!("message-{}", i + 1).into_bytes());
    }
    assert_eq!(consumer.committed_offset(0), 5);

    let committed: u64 = fs::read_to_string(
        offsets.path().join("group-a").join("partition-0.offset"),
    )
    .unwrap()
    .trim()
    .parse()
    .unwrap();
    assert_eq!(committed, 5);
}

#[test]
fn test_consumer_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let offsets = TempDir::new().unwrap();
    let log = PartitionedLog::open(dir.path(), 1).unwrap();

    // First run: three messages exist; consume all of them and commit.
    for i in 1..=3u32 {
        log.produce("key", format!("message-{}", i).as_bytes()).unwrap();
    }
    let seen = Arc::new(AtomicUsize::new(0));
    let mut consumer = QueueConsumer::new(dir.path(), offsets.path(), "group-a", 1).unwrap();
    {
        let seen = Arc::clone(&seen);
        consumer.start(Arc::new(move |_message| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
    }
    assert!(wait_for(
        || seen.load(Ordering::SeqCst) == 3,
        Duration::from_secs(3)
    ));
    consumer.stop();
    assert_eq!(consumer.committed_offset(0), 3);
    drop(consumer);

    // Messages 4 and 5 arrive while no consumer is running.
    log.produce("key", b"message-4").unwrap();
    log.produce("key", b"message-5").unwrap();

    // Second run: a fresh consumer for the same group resumes at the
    // committed offset and delivers exactly the remainder, in order.
    let delivered: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let mut consumer = QueueConsumer::new(dir.path(), offsets.path(), "group-a", 1).unwrap();
    assert_eq!(consumer.committed_offset(0), 3);
    {
        let delivered = Arc::clone(&delivered);
        consumer.start(Arc::new(move |message| {
            delivered.lock().unwrap().push(message.offset);
        }));
    }
    assert!(wait_for(
        || delivered.lock().unwrap().len() == 2,
        Duration::from_secs(3)
    ));
    consumer.stop();

    assert_eq!(*delivered.lock().unwrap(), vec![4, 5]);
}

#[test]
fn test_consumer_groups_are_independent() {
    let dir = TempDir::new().unwrap();
    let offsets = TempDir::new().unwrap();
    let log = PartitionedLog::open(dir.path(), 1).unwrap();
    for _ in 0..4 {
        log.produce("key", b"m").unwrap();
    }

    for group in ["group-a", "group-b"] {
        let count = Arc::new(AtomicUsize::new(0));
        let mut consumer = QueueConsumer::new(dir.path(), offsets.path(), group, 1).unwrap();
        {
            let count = Arc::clone(&count);
            consumer.start(Arc::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_for(
            || count.load(Ordering::SeqCst) == 4,
            Duration::from_secs(3)
        ));
        consumer.stop();
    }
}

#[test]
fn test_consumer_picks_up_messages_produced_while_running() {
    let dir = TempDir::new().unwrap();
    let offsets = TempDir::new().unwrap();
    let log = PartitionedLog::open(dir.path(), 1).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let mut consumer = QueueConsumer::new(dir.path(), offsets.path(), "group-a", 1).unwrap();
    {
        let count = Arc::clone(&count);
        consumer.start(Arc::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Produce after the consumer has started (and is sleeping, caught up).
    std::thread::sleep(Duration::from_millis(150));
    log.produce("key", b"late").unwrap();

    assert!(wait_for(
        || count.load(Ordering::SeqCst) == 1,
        Duration::from_secs(3)
    ));
    consumer.stop();
}
