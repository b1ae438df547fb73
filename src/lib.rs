// src/lib.rs
//! LogSink: log record shipping pipeline
//!
//! Accepts structured log records from any number of producer threads,
//! buffers them in a bounded ring, batches them on a size/time trigger,
//! encodes them as OTLP logs and exports them over HTTP/protobuf or gRPC with
//! retry and backpressure.
//!
//! # Architecture
//!
//! ```text
//! submit(Record) ──▶ RingBuffer ──▶ Batcher ──▶ OtlpEncoder ──▶ Exporter ──▶ collector
//!   (producers)      (bounded)     (1 task)                    (N workers)
//! ```
//!
//! - **model**: records, resource identity, batches
//! - **buffer**: bounded multi-producer / single-consumer ring with overflow policies
//! - **batcher**: dual-trigger batching task
//! - **encoding**: OTLP protobuf messages, encoder, compression
//! - **exporter**: transports, retry/backoff, in-flight queue and workers
//! - **pipeline**: lifecycle controller and producer API
//! - **observability**: counters, tracing and metrics setup
//! - **ingest**: plain-text line grouping and level detection
//! - **utils**: configuration, errors, clocks
//!
//! # Guarantees
//!
//! - `submit` never panics, never returns an error, and blocks only under
//!   `OverflowPolicy::Block`, for at most the configured timeout.
//! - Records accepted within capacity reach exactly one batch, in per-producer
//!   order.
//! - Delivery is **at-least-once**: a retried send may duplicate records at
//!   the collector. Order across batches is not preserved at the collector.
//! - Every loss (overflow, export drop, shutdown deadline) is counted in
//!   `StatsSnapshot`.
//!
//! # Example
//!
//! ```no_run
//! use logsink::{LogPipeline, PipelineConfig, Record, Severity};
//! use std::time::Duration;
//!
//! # async fn run() -> logsink::Result<()> {
//! let pipeline = LogPipeline::new();
//! pipeline.start(PipelineConfig::load()?)?;
//!
//! let _ = pipeline.submit(
//!     Record::new(Severity::Warn, "disk almost full").with_attribute("disk.used_pct", 91.5),
//! );
//!
//! let report = pipeline.shutdown(Duration::from_secs(5)).await;
//! assert_eq!(report.lost_records, 0);
//! # Ok(())
//! # }
//! ```

pub mod batcher;
pub mod buffer;
pub mod encoding;
pub mod exporter;
pub mod ingest;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod utils;

// Re-export commonly used types
pub use buffer::{OverflowPolicy, RejectReason, SubmitOutcome};
pub use model::{AttributeValue, Record, Resource, Severity, TraceContext};
pub use observability::StatsSnapshot;
pub use pipeline::{LogPipeline, ShutdownReport};
pub use utils::config::PipelineConfig;
pub use utils::errors::{PipelineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
