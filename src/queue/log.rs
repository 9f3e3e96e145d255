use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::ServiceError;
use crate::hash::partition_for_key;

/// Name of the per-partition durable offset file.
const OFFSET_FILE: &str = "offset.txt";

/// Render an offset as the fixed-width file stem: 20 decimal digits,
/// zero-padded, so lexicographic order equals offset order.
pub fn format_offset(offset: u64) -> String {
    format!("{:020}", offset)
}

/// Partitioned append-only log.
///
/// ## Layout:
/// ```text
/// <base>/partition-<k>/<20-digit-offset>.msg   message bytes, immutable
/// <base>/partition-<k>/offset.txt              last assigned offset, ASCII
/// ```
///
/// ## Semantics:
/// - `produce` assigns `partition = stable_hash(key) mod N` and the next
///   offset for that partition; the first message in a partition is offset 1.
/// - Offsets within a partition are strictly increasing and contiguous. The
///   in-memory offset advances only after both the message file and
///   `offset.txt` are written, so a failed produce reuses its offset and no
///   gap appears.
/// - After a successful produce, `offset.txt` equals the offset of the
///   newest `.msg` file.
/// - Durability is flush-level, not fsync; crash-safe durability is a
///   documented non-goal.
///
/// ## Thread safety:
/// - One mutex per partition; it is the only writer to that partition's
///   files and offset. Producers for different partitions do not contend.
pub struct PartitionedLog {
    base: PathBuf,
    next_offsets: Vec<Mutex<u64>>,
}

impl PartitionedLog {
    /// Create partition directories under `base` and load the durable
    /// offsets (a missing `offset.txt` means an empty partition).
    ///
    /// # Errors
    /// - `InvalidPartitionCount` for zero partitions
    /// - `Io` if a directory cannot be created or an offset file read
    /// - `InvalidOffsetFile` if an offset file exists but does not parse
    pub fn open(base: impl Into<PathBuf>, partitions: u32) -> Result<Self, ServiceError> {
        if partitions == 0 {
            return Err(ServiceError::InvalidPartitionCount(partitions));
        }

        let base = base.into();
        let mut next_offsets = Vec::with_capacity(partitions as usize);
        for partition in 0..partitions {
            let dir = base.join(format!("partition-{}", partition));
            fs::create_dir_all(&dir)?;
            next_offsets.push(Mutex::new(load_offset(&dir)?));
        }

        Ok(Self { base, next_offsets })
    }

    pub fn partition_count(&self) -> u32 {
        self.next_offsets.len() as u32
    }

    /// The partition `key` routes to. Deterministic across processes.
    pub fn partition_for(&self, key: &str) -> u32 {
        partition_for_key(key, self.partition_count())
    }

    /// Append `message` to the partition selected by `key`.
    ///
    /// Under the partition mutex: assign the next offset, write the message
    /// file, flush, overwrite `offset.txt`, flush, then commit the offset in
    /// memory. Returns the assigned `(partition, offset)`.
    pub fn produce(&self, key: &str, message: &[u8]) -> Result<(u32, u64), ServiceError> {
        let partition = self.partition_for(key);
        let dir = self.base.join(format!("partition-{}", partition));

        let mut next = self.next_offsets[partition as usize]
            .lock()
            .map_err(|_| ServiceError::LockPoisoned)?;
        let offset = *next + 1;

        let message_path = dir.join(format!("{}.msg", format_offset(offset)));
        let mut message_file = File::create(&message_path)?;
        message_file.write_all(message)?;
        message_file.flush()?;

        let mut offset_file = File::create(dir.join(OFFSET_FILE))?;
        offset_file.write_all(offset.to_string().as_bytes())?;
        offset_file.flush()?;

        *next = offset;
        debug!(partition, offset, bytes = message.len(), "produced message");
        Ok((partition, offset))
    }

    /// Last offset assigned in `partition` (0 when empty).
    pub fn last_offset(&self, partition: u32) -> Result<u64, ServiceError> {
        self.next_offsets
            .get(partition as usize)
            .ok_or(ServiceError::InvalidPartitionCount(partition))?
            .lock()
            .map(|next| *next)
            .map_err(|_| ServiceError::LockPoisoned)
    }
}

fn load_offset(dir: &Path) -> Result<u64, ServiceError> {
    let path = dir.join(OFFSET_FILE);
    match fs::read_to_string(&path) {
        Ok(contents) => {
            contents
                .trim()
                .parse()
                .map_err(|e| ServiceError::InvalidOffsetFile {
                    path: path.display().to_string(),
                    reason: format!("{}", e),
                })
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}
