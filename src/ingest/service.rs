use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::ingest::metric::MetricBatch;
use crate::ingest::validate;
use crate::ingest::writer::BatchWriter;
use crate::limiter::RateLimiter;
use crate::metrics::IngestCounters;
use crate::protocol::request::HttpRequest;
use crate::protocol::response::HttpResponse;
use crate::queue::sink::{MetricSink, PrintSink, SinkMode};
use crate::queue::PartitionedLog;
use crate::server::event_loop::{EventLoop, EventLoopHandle, RequestHandler};

/// How often the telemetry flusher drains the rate limiter's rings.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// Granularity at which the flusher notices shutdown.
const FLUSH_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    /// Per-client admission ceiling per second.
    pub rate_limit: usize,
    pub partitions: u32,
    /// Base directory of the partitioned log (file sink only).
    pub queue_dir: PathBuf,
    pub sink: SinkMode,
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            rate_limit: 10_000,
            partitions: 4,
            queue_dir: PathBuf::from("queue"),
            sink: SinkMode::File,
            worker_threads: 16,
        }
    }
}

/// Handle for stopping a serving `IngestionService` from another thread.
#[derive(Clone)]
pub struct ServiceHandle {
    loop_handle: EventLoopHandle,
}

impl ServiceHandle {
    /// Idempotent. `serve` returns within one polling tick; the writer then
    /// drains and the flusher stops.
    pub fn stop(&self) {
        self.loop_handle.stop();
    }
}

/// The ingestion orchestrator.
///
/// Wires the rate limiter, the async writer, the counters, and the event
/// loop, and routes the three HTTP endpoints:
///
/// - `POST /metrics`: admission -> parse -> validate -> enqueue for write
/// - `GET /health`: liveness probe
/// - `GET /metrics`: the four service counters
pub struct IngestionService {
    config: ServiceConfig,
    counters: Arc<IngestCounters>,
    limiter: Arc<RateLimiter>,
    writer: BatchWriter,
    event_loop: Option<EventLoop>,
    loop_handle: EventLoopHandle,
    flusher_stop: Arc<AtomicBool>,
}

impl IngestionService {
    /// Build the pipeline. Fails fast if the sink's directories or the
    /// readiness mechanism cannot be created; nothing serves in that case.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let sink: Arc<dyn MetricSink> = match config.sink {
            SinkMode::File => Arc::new(PartitionedLog::open(&config.queue_dir, config.partitions)?),
            SinkMode::Print => Arc::new(PrintSink::new(config.partitions)),
        };

        let event_loop = EventLoop::new(config.worker_threads)?;
        let loop_handle = event_loop.handle();

        Ok(Self {
            counters: Arc::new(IngestCounters::new()),
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            writer: BatchWriter::start(sink),
            event_loop: Some(event_loop),
            loop_handle,
            flusher_stop: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            loop_handle: self.loop_handle.clone(),
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    /// Bind the port and serve until `stop()` is called. On return the
    /// writer has drained its queue and the telemetry flusher has stopped.
    pub fn serve(mut self) -> Result<(), ServiceError> {
        let listener = std::net::TcpListener::bind(("0.0.0.0", self.config.port))?;
        info!(
            port = self.config.port,
            partitions = self.config.partitions,
            rate_limit = self.config.rate_limit,
            sink = ?self.config.sink,
            "ingestion service listening"
        );

        let flusher = {
            let limiter = Arc::clone(&self.limiter);
            let stop = Arc::clone(&self.flusher_stop);
            thread::Builder::new()
                .name("telemetry-flusher".to_string())
                .spawn(move || flusher_loop(&limiter, &stop))
                .expect("failed to spawn telemetry flusher")
        };

        let writer_handle = self.writer.queue_handle();
        let handler = request_handler(
            Arc::clone(&self.counters),
            Arc::clone(&self.limiter),
            Arc::new(move |batch, client_id| writer_handle.enqueue(batch, client_id)),
        );

        let event_loop = self
            .event_loop
            .take()
            .expect("serve called twice on one service");
        let result = event_loop.run(listener, handler);

        self.flusher_stop.store(true, Ordering::Release);
        let _ = flusher.join();
        self.writer.stop();
        info!("ingestion service stopped");
        result
    }
}

fn flusher_loop(limiter: &RateLimiter, stop: &AtomicBool) {
    let ticks_per_flush = (FLUSH_INTERVAL.as_millis() / FLUSH_TICK.as_millis()).max(1);
    loop {
        for _ in 0..ticks_per_flush {
            if stop.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(FLUSH_TICK);
        }
        limiter.flush_telemetry(|client, event| {
            info!(
                target: "telemetry",
                client,
                timestamp_ms = event.timestamp_ms,
                allowed = event.allowed,
                "rate limit decision"
            );
        });
    }
}

fn request_handler(
    counters: Arc<IngestCounters>,
    limiter: Arc<RateLimiter>,
    enqueue: Arc<dyn Fn(MetricBatch, String) + Send + Sync>,
) -> RequestHandler {
    Arc::new(move |raw: &[u8]| {
        let request = match HttpRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                return HttpResponse::json(400, error_body(&format!("Malformed request: {}", e)))
                    .encode()
            }
        };
        let keep_alive = request.keep_alive;

        let response = match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/metrics") => {
                handle_metrics_post(&counters, &limiter, enqueue.as_ref(), &request)
            }
            ("GET", "/health") => HttpResponse::json(
                200,
                json!({"status": "healthy", "service": "ingestion"}).to_string(),
            ),
            ("GET", "/metrics") => handle_metrics_get(&counters),
            _ => HttpResponse::json(404, error_body("Not found")),
        };

        response.keep_alive(keep_alive).encode()
    })
}

fn handle_metrics_post(
    counters: &IngestCounters,
    limiter: &RateLimiter,
    enqueue: &dyn Fn(MetricBatch, String),
    request: &HttpRequest,
) -> HttpResponse {
    // The opaque client identifier doubles as rate-limit key and partition
    // key. Exact-case header lookup mirrors the framing layer.
    let client_id = request.header("Authorization").unwrap_or("default").to_string();

    if !limiter.allow(&client_id) {
        counters.inc_rate_limited();
        return HttpResponse::json(429, error_body("Rate limit exceeded"));
    }

    let batch = match MetricBatch::parse(&request.body) {
        Ok(batch) => batch,
        Err(e) => {
            counters.inc_validation_errors();
            return HttpResponse::json(400, error_body(&format!("Invalid JSON: {}", e)));
        }
    };

    if let Err(e) = validate::validate_batch(&batch) {
        counters.inc_validation_errors();
        return HttpResponse::json(400, error_body(&e.to_string()));
    }

    let metrics_processed = batch.len();
    counters.add_metrics_received(metrics_processed as u64);
    counters.inc_batches_processed();
    enqueue(batch, client_id);

    HttpResponse::json(
        200,
        json!({"success": true, "metrics_processed": metrics_processed}).to_string(),
    )
}

fn handle_metrics_get(counters: &IngestCounters) -> HttpResponse {
    match serde_json::to_string(&counters.snapshot()) {
        Ok(body) => HttpResponse::json(200, body),
        Err(e) => {
            error!(error = %e, "failed to serialize counters");
            HttpResponse::json(500, error_body("Internal error"))
        }
    }
}

fn error_body(message: &str) -> String {
    json!({"error": message}).to_string()
}
