//! MetricStream server entry point.
//!
//! Accepts batched metrics over HTTP, rate-limits per client, and enqueues
//! accepted batches onto the configured sink.

use metricstream::ingest::{IngestionService, ServiceConfig};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut config = ServiceConfig::default();
    let mut log_level = "info".to_string();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--sink" => {
                config.sink = next_value(&args, &mut i, "--sink")?.parse()?;
            }
            "--partitions" => {
                config.partitions = next_value(&args, &mut i, "--partitions")?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid partition count"))?;
            }
            "--rate-limit" => {
                config.rate_limit = next_value(&args, &mut i, "--rate-limit")?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid rate limit"))?;
            }
            "--queue-dir" => {
                config.queue_dir = next_value(&args, &mut i, "--queue-dir")?.into();
            }
            "--workers" => {
                config.worker_threads = next_value(&args, &mut i, "--workers")?
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid worker count"))?;
            }
            "--log-level" => {
                log_level = next_value(&args, &mut i, "--log-level")?.to_string();
            }
            arg if !arg.starts_with('-') && i == 1 => {
                config.port = arg
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid port: {}", arg))?;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    init_logging(&log_level);

    let service = IngestionService::new(config)?;
    service.serve()?;
    Ok(())
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_usage() {
    println!("metricstream: HTTP metric ingestion server");
    println!();
    println!("Usage:");
    println!("  metricstream [port] [options]");
    println!();
    println!("Options:");
    println!("  --sink <file|print>    Where accepted batches go (default: file)");
    println!("  --partitions <n>       Partition count of the log (default: 4)");
    println!("  --rate-limit <n>       Per-client requests per second (default: 10000)");
    println!("  --queue-dir <path>     Base directory of the log (default: queue)");
    println!("  --workers <n>          Request worker threads (default: 16)");
    println!("  --log-level <level>    trace, debug, info, warn, error (default: info)");
    println!();
    println!("Examples:");
    println!("  metricstream 8080");
    println!("  metricstream 8080 --sink file --partitions 4 --rate-limit 10000");
}
