use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::queue::log::format_offset;

/// How long a caught-up partition reader sleeps before probing again.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One message delivered to a consumer handler.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub partition: u32,
    pub offset: u64,
    pub data: Vec<u8>,
}

pub type MessageHandler = Arc<dyn Fn(ConsumedMessage) + Send + Sync>;

/// Consumer-group reader over a partitioned log directory.
///
/// ## Semantics:
/// - One reader thread per partition; within a partition, messages are
///   delivered in strict offset order, exactly once per run.
/// - The committed offset for partition `k` lives in
///   `<offsets_root>/<group>/partition-<k>.offset`; 0 means nothing
///   consumed. The commit is written after the handler returns, so a crash
///   between delivery and commit replays that message: at-least-once across
///   restarts.
/// - A reader that has caught up to the producer sleeps `POLL_INTERVAL` and
///   probes for the next message file again.
/// - `stop` is idempotent; readers observe it within one poll interval.
pub struct QueueConsumer {
    queue_path: PathBuf,
    group_dir: PathBuf,
    group: String,
    partitions: u32,
    running: Arc<AtomicBool>,
    read_offsets: Arc<Vec<AtomicU64>>,
    threads: Vec<JoinHandle<()>>,
}

impl QueueConsumer {
    /// Load committed offsets for `group` (absent files mean offset 0) and
    /// create the group's offset directory.
    pub fn new(
        queue_path: impl Into<PathBuf>,
        offsets_root: impl Into<PathBuf>,
        group: &str,
        partitions: u32,
    ) -> Result<Self, ServiceError> {
        if partitions == 0 {
            return Err(ServiceError::InvalidPartitionCount(partitions));
        }

        let queue_path = queue_path.into();
        let group_dir = offsets_root.into().join(group);
        fs::create_dir_all(&group_dir)?;

        let mut read_offsets = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let path = group_dir.join(format!("partition-{}.offset", partition));
            let offset = match fs::read_to_string(&path) {
                Ok(contents) => {
                    contents
                        .trim()
                        .parse()
                        .map_err(|e| ServiceError::InvalidOffsetFile {
                            path: path.display().to_string(),
                            reason: format!("{}", e),
                        })?
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            read_offsets.push(AtomicU64::new(offset));
        }

        Ok(Self {
            queue_path,
            group_dir,
            group: group.to_string(),
            partitions,
            running: Arc::new(AtomicBool::new(false)),
            read_offsets: Arc::new(read_offsets),
            threads: Vec::new(),
        })
    }

    /// Spawn one reader thread per partition. A second call while running is
    /// a no-op.
    pub fn start(&mut self, handler: MessageHandler) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(group = %self.group, partitions = self.partitions, "starting consumer");

        for partition in 0..self.partitions {
            let queue_path = self.queue_path.clone();
            let group_dir = self.group_dir.clone();
            let running = Arc::clone(&self.running);
            let read_offsets = Arc::clone(&self.read_offsets);
            let handler = Arc::clone(&handler);
            let thread = thread::Builder::new()
                .name(format!("consumer-{}", partition))
                .spawn(move || {
                    consume_partition(
                        partition,
                        &queue_path,
                        &group_dir,
                        &running,
                        &read_offsets,
                        &handler,
                    )
                })
                .expect("failed to spawn consumer thread");
            self.threads.push(thread);
        }
    }

    /// Idempotent. Reader threads exit within one poll interval.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }

    /// Committed offset for `partition` as seen in memory.
    pub fn committed_offset(&self, partition: u32) -> u64 {
        self.read_offsets[partition as usize].load(Ordering::Acquire)
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume_partition(
    partition: u32,
    queue_path: &Path,
    group_dir: &Path,
    running: &AtomicBool,
    read_offsets: &[AtomicU64],
    handler: &MessageHandler,
) {
    debug!(partition, "consumer thread started");
    let partition_dir = queue_path.join(format!("partition-{}", partition));

    while running.load(Ordering::Acquire) {
        let next = read_offsets[partition as usize].load(Ordering::Acquire) + 1;
        let message_path = partition_dir.join(format!("{}.msg", format_offset(next)));

        match fs::read(&message_path) {
            Ok(data) => {
                handler(ConsumedMessage {
                    partition,
                    offset: next,
                    data,
                });
                read_offsets[partition as usize].store(next, Ordering::Release);
                if let Err(e) = commit_offset(group_dir, partition, next) {
                    error!(partition, offset = next, error = %e, "failed to commit offset");
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Caught up to the producer.
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(partition, offset = next, error = %e, "failed to read message");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
    debug!(partition, "consumer thread stopped");
}

fn commit_offset(group_dir: &Path, partition: u32, offset: u64) -> std::io::Result<()> {
    let path = group_dir.join(format!("partition-{}.offset", partition));
    let mut file = File::create(path)?;
    file.write_all(offset.to_string().as_bytes())?;
    file.flush()
}
