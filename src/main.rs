// src/main.rs
//! LogSink CLI
//!
//! Ships plain-text log lines from stdin or a file to an OTLP collector.
//! Multi-line entries (stack traces) are grouped by a record-start pattern
//! and each entry's level is detected from its text.

use anyhow::{Context, Result};
use clap::Parser;
use logsink::ingest::{record_from_text, LineAssembler, LossyLines, DEFAULT_RECORD_START};
use logsink::observability::{init_metrics, init_tracing};
use logsink::{BuildInfo, LogPipeline, PipelineConfig, SubmitOutcome};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "logsink", version)]
#[command(about = "Ship log lines to an OTLP collector")]
struct Args {
    #[arg(long, env = "LOGSINK_CONFIG", help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(long, help = "Read lines from this file instead of stdin")]
    file: Option<PathBuf>,

    #[arg(long, env = "LOGSINK_METRICS_ADDR", help = "Serve Prometheus metrics on this address")]
    metrics_addr: Option<SocketAddr>,

    #[arg(long, default_value = DEFAULT_RECORD_START, help = "Regex marking the first line of a record")]
    record_start: String,

    #[arg(long, help = "Print a JSON stats snapshot on exit")]
    print_stats: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing()?;
    if let Some(addr) = args.metrics_addr {
        init_metrics(addr)?;
    }

    let build = BuildInfo::current();
    info!("Starting logsink v{} ({})", build.version, build.git_hash);

    let config = PipelineConfig::load_from(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration loaded: {:?}", config);

    let pipeline = LogPipeline::new();
    pipeline.start(config)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut assembler = LineAssembler::with_pattern(&args.record_start)?;
    let mut lines = LossyLines::new(reader);
    let mut submitted = 0u64;
    let mut rejected = 0u64;
    let mut read_error = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read input, shutting down: {}", e);
                    read_error = Some(e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
        };

        let Some(line) = line else { break };
        if let Some(entry) = assembler.feed(&line) {
            ship(&pipeline, entry, &mut submitted, &mut rejected);
        }
    }

    if let Some(entry) = assembler.finish() {
        ship(&pipeline, entry, &mut submitted, &mut rejected);
    }

    info!("Input finished: {} records submitted, {} rejected", submitted, rejected);

    let report = pipeline.close().await;
    println!(
        "shutdown: lost_records={} lost_batches={} drained_cleanly={} elapsed_ms={}",
        report.lost_records,
        report.lost_batches,
        report.drained_cleanly,
        report.elapsed.as_millis()
    );

    if args.print_stats {
        println!("{}", serde_json::to_string_pretty(&pipeline.stats())?);
    }

    match read_error {
        Some(e) => Err(e).context("Failed to read input"),
        None => Ok(()),
    }
}

fn ship(pipeline: &LogPipeline, entry: String, submitted: &mut u64, rejected: &mut u64) {
    match pipeline.submit(record_from_text(entry)) {
        SubmitOutcome::Accepted => *submitted += 1,
        SubmitOutcome::Rejected(reason) => {
            *rejected += 1;
            if *rejected == 1 {
                warn!("Pipeline rejecting input ({}); further rejections are only counted", reason);
            }
        }
    }
}
