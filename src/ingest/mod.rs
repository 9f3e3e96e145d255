/// Metric ingestion pipeline.
///
/// - metric: wire and log data model for metric batches
/// - validate: batch admission rules
/// - writer: background thread draining accepted batches into the sink
/// - service: the orchestrator wiring endpoints, limiter, writer, and loop
pub mod metric;
pub mod service;
pub mod validate;
pub mod writer;

pub use metric::{Metric, MetricBatch, MetricKind};
pub use service::{IngestionService, ServiceConfig, ServiceHandle};
pub use writer::BatchWriter;
