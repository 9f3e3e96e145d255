use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::error::ServiceError;
use crate::hash::partition_for_key;
use crate::queue::log::PartitionedLog;

/// The seam between the write path and whatever stores accepted batches.
///
/// Every sink routes by key, assigns a `(partition, offset)` identity to the
/// message, and preserves per-partition ordering for a given producer.
pub trait MetricSink: Send + Sync {
    fn produce(&self, key: &str, message: &[u8]) -> Result<(u32, u64), ServiceError>;
    fn flush(&self) -> Result<(), ServiceError>;
}

impl MetricSink for PartitionedLog {
    fn produce(&self, key: &str, message: &[u8]) -> Result<(u32, u64), ServiceError> {
        PartitionedLog::produce(self, key, message)
    }

    fn flush(&self) -> Result<(), ServiceError> {
        // Every produce flushes its own files.
        Ok(())
    }
}

/// Debugging sink: logs each payload instead of storing it.
///
/// Partitioning and offset assignment follow the same contract as the real
/// log so the rest of the pipeline behaves identically.
pub struct PrintSink {
    offsets: Vec<AtomicU64>,
}

impl PrintSink {
    pub fn new(partitions: u32) -> Self {
        let partitions = partitions.max(1);
        Self {
            offsets: (0..partitions).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl MetricSink for PrintSink {
    fn produce(&self, key: &str, message: &[u8]) -> Result<(u32, u64), ServiceError> {
        let partition = partition_for_key(key, self.offsets.len() as u32);
        let offset = self.offsets[partition as usize].fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            target: "sink",
            partition,
            offset,
            key,
            payload = %String::from_utf8_lossy(message),
            "batch"
        );
        Ok((partition, offset))
    }

    fn flush(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Which sink the service writes accepted batches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Partitioned on-disk log (default).
    File,
    /// Log-only sink for debugging and load testing.
    Print,
}

impl FromStr for SinkMode {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(SinkMode::File),
            "print" => Ok(SinkMode::Print),
            other => Err(ServiceError::UnknownSinkMode(other.to_string())),
        }
    }
}
