//! metricstream-consumer: tail a partitioned queue directory.
//!
//! Reads every partition of a queue for one consumer group, printing a
//! preview of each message and committing offsets so a restart resumes
//! where it left off.

use std::sync::Arc;
use std::time::Duration;

use metricstream::queue::{ConsumedMessage, QueueConsumer};

/// Longest payload preview printed per message.
const PREVIEW_BYTES: usize = 200;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 4 {
        print_usage();
        std::process::exit(1);
    }

    let queue_path = &args[1];
    let group = &args[2];
    let partitions: u32 = args[3]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid partition count: {}", args[3]))?;

    let mut offsets_root = "consumer_offsets".to_string();
    let mut log_level = "info".to_string();
    let mut i = 4;
    while i < args.len() {
        match args[i].as_str() {
            "--offsets-dir" => {
                i += 1;
                offsets_root = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--offsets-dir requires a value"))?
                    .clone();
            }
            "--log-level" => {
                i += 1;
                log_level = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--log-level requires a value"))?
                    .clone();
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut consumer = QueueConsumer::new(queue_path, &offsets_root, group, partitions)?;
    consumer.start(Arc::new(print_message));

    // Reader threads do the work; run until the process is terminated.
    loop {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn print_message(message: ConsumedMessage) {
    let preview_len = message.data.len().min(PREVIEW_BYTES);
    let preview = String::from_utf8_lossy(&message.data[..preview_len]);
    let ellipsis = if message.data.len() > PREVIEW_BYTES { "..." } else { "" };
    println!(
        "[partition {} | offset {}] {}{}",
        message.partition, message.offset, preview, ellipsis
    );
}

fn print_usage() {
    eprintln!("metricstream-consumer: tail a partitioned metric queue");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  metricstream-consumer <queue_path> <group> <partitions> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --offsets-dir <path>   Committed-offset root (default: consumer_offsets)");
    eprintln!("  --log-level <level>    trace, debug, info, warn, error (default: info)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  metricstream-consumer queue storage-writer 4");
}
