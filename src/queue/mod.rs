/// Partitioned on-disk message queue.
///
/// Current scope:
/// - log: append-only partition directories with durable offset tracking
/// - consumer: per-partition readers committing offsets per consumer group
/// - sink: the produce/flush seam the write path talks to
pub mod consumer;
pub mod log;
pub mod sink;

pub use consumer::{ConsumedMessage, QueueConsumer};
pub use log::PartitionedLog;
pub use sink::{MetricSink, PrintSink, SinkMode};
