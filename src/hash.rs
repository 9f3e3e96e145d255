use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash a routing key to a stable 64-bit value.
///
/// `DefaultHasher::new()` uses fixed keys, so the same input hashes to the
/// same value in every process of the same build. Both partition selection
/// and rate-limiter shard selection depend on this: a key must land on the
/// same partition directory after a restart.
pub fn stable_hash(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic partition assignment: `stable_hash(key) mod partitions`.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    (stable_hash(key) % u64::from(partitions)) as u32
}
