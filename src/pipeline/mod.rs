// src/pipeline/mod.rs
//! Pipeline controller
//!
//! Wires ring buffer, batcher, encoder and exporter into one lifecycle and
//! exposes the producer-facing `submit`.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──start()──▶ running ──shutdown(timeout)──▶ stopped
//!   │                   │                             │
//!   submit: NotStarted  submit: buffered              submit: Closed
//! ```
//!
//! A pipeline is single-use: `start` after `shutdown` is a no-op.
//!
//! # Delivery
//!
//! At-least-once. Retried sends can duplicate records at the collector, and
//! end-to-end order across batches is not preserved when retries interleave
//! with later batches.

use crate::batcher::{BatchLimits, Batcher, BatcherHandle};
use crate::buffer::{RejectReason, RingBuffer, SubmitOutcome};
use crate::encoding::OtlpEncoder;
use crate::exporter::{build_transport, Exporter, RetryPolicy, Transport};
use crate::model::{BatchBuilder, Record, Resource};
use crate::observability::{PipelineStats, StatsSnapshot};
use crate::utils::clock::{unix_nanos_now, Clock, TokioClock};
use crate::utils::config::PipelineConfig;
use crate::utils::errors::{PipelineError, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

/// Outcome of a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ShutdownReport {
    /// Records discarded because the deadline passed before delivery
    pub lost_records: u64,

    /// Encoded batches discarded at the deadline
    pub lost_batches: u64,

    /// Every buffered record was sealed and every batch reached a terminal
    /// outcome before the deadline
    pub drained_cleanly: bool,

    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

struct Running {
    config: PipelineConfig,
    resource: Arc<Resource>,
    buffer: RingBuffer,
    batcher: BatcherHandle,
    exporter: Arc<Exporter>,
    report: tokio::sync::OnceCell<ShutdownReport>,
}

/// Log shipping pipeline
pub struct LogPipeline {
    stats: Arc<PipelineStats>,
    running: OnceCell<Running>,
}

impl Default for LogPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl LogPipeline {
    /// Create an unstarted pipeline; every `submit` is rejected until `start`
    pub fn new() -> Self {
        Self {
            stats: Arc::new(PipelineStats::new()),
            running: OnceCell::new(),
        }
    }

    /// Validate `config`, allocate the buffer and spawn the batcher and export
    /// workers on the current tokio runtime. No-op when already started.
    pub fn start(&self, config: PipelineConfig) -> Result<()> {
        if self.running.get().is_some() {
            return Ok(());
        }
        config.validate()?;
        ensure_runtime()?;
        let transport = build_transport(&config.exporter)?;
        self.start_with(config, transport, Arc::new(TokioClock))
    }

    /// `start` with a caller-supplied transport and retry clock
    pub fn start_with(
        &self,
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<()> {
        self.running
            .get_or_try_init(|| {
                config.validate()?;
                ensure_runtime()?;
                Ok::<_, PipelineError>(self.launch(config, transport, clock))
            })
            .map(|_| ())
    }

    fn launch(
        &self,
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Running {
        let resource = Arc::new(config.resource());

        let (buffer, consumer) = RingBuffer::bounded(
            config.buffer.capacity,
            config.buffer.overflow_policy,
            config.buffer.block_timeout(),
            config.batch.max_records,
        );

        let exporter = Arc::new(Exporter::start(
            transport,
            clock,
            RetryPolicy::from(&config.retry),
            Arc::clone(&self.stats),
            config.exporter.concurrency,
            config.exporter.queue_capacity,
            config.exporter.queue_overflow,
        ));

        let batcher = Batcher::new(
            consumer,
            BatchBuilder::new(
                config.batch.max_records,
                config.batch.max_bytes,
                Arc::clone(&resource),
            ),
            OtlpEncoder::new(&config.scope()),
            Arc::clone(&exporter),
            Arc::clone(&self.stats),
            BatchLimits {
                max_records: config.batch.max_records,
                max_bytes: config.batch.max_bytes,
                flush_interval: config.batch.flush_interval(),
            },
        )
        .spawn();

        info!(
            "Log pipeline started: service={} endpoint={} capacity={} policy={:?}",
            resource.get("service.name").unwrap_or_default(),
            config.exporter.endpoint,
            config.buffer.capacity,
            config.buffer.overflow_policy
        );

        Running {
            config,
            resource,
            buffer,
            batcher,
            exporter,
            report: tokio::sync::OnceCell::new(),
        }
    }

    /// Hand a record to the pipeline. Never blocks beyond the configured
    /// block timeout, never panics, never returns an error.
    pub fn submit(&self, mut record: Record) -> SubmitOutcome {
        let Some(running) = self.running.get() else {
            self.stats.record_not_started();
            return SubmitOutcome::Rejected(RejectReason::NotStarted);
        };

        if record.observed_time_unix_nano == 0 {
            record.observed_time_unix_nano = unix_nanos_now();
        }
        running.buffer.submit(record)
    }

    /// Seal the open batch without waiting for the flush interval
    pub fn flush(&self) -> Result<()> {
        let running = self.running.get().ok_or(PipelineError::NotStarted)?;
        running.batcher.flush();
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.running.get().is_some()
    }

    /// Current ring-buffer occupancy
    pub fn occupancy(&self) -> usize {
        self.running.get().map(|r| r.buffer.len()).unwrap_or(0)
    }

    /// Resource attached to every batch
    pub fn resource(&self) -> Option<Arc<Resource>> {
        self.running.get().map(|r| Arc::clone(&r.resource))
    }

    pub fn config(&self) -> Option<&PipelineConfig> {
        self.running.get().map(|r| &r.config)
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        let buffer = self
            .running
            .get()
            .map(|r| r.buffer.stats())
            .unwrap_or_default();
        self.stats.snapshot(&buffer)
    }

    /// Shut down with the configured grace period
    pub async fn close(&self) -> ShutdownReport {
        let grace = self
            .running
            .get()
            .map(|r| r.config.shutdown_grace())
            .unwrap_or_default();
        self.shutdown(grace).await
    }

    /// Stop accepting records, flush everything buffered, and wait up to
    /// `timeout` for the exporter to finish. Whatever is still undelivered at
    /// the deadline is discarded and counted.
    ///
    /// Repeated or concurrent calls return the first call's report.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let Some(running) = self.running.get() else {
            return ShutdownReport {
                drained_cleanly: true,
                ..ShutdownReport::default()
            };
        };

        *running
            .report
            .get_or_init(|| self.drain(running, timeout))
            .await
    }

    async fn drain(&self, running: &Running, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + timeout;
        info!("Log pipeline shutting down (grace {:?})", timeout);

        running.buffer.close();
        let batcher_exit = running.batcher.shutdown(deadline).await;
        let export = running.exporter.shutdown(deadline).await;

        // only non-zero when the batcher missed the deadline
        let stranded = running.buffer.len() as u64;
        let abandoned = batcher_exit.map_or(0, |exit| exit.abandoned_records as u64);

        let report = ShutdownReport {
            lost_records: export.lost_records + abandoned + stranded,
            lost_batches: export.lost_batches,
            drained_cleanly: batcher_exit.map_or(false, |exit| exit.completed)
                && export.completed
                && stranded == 0,
            elapsed: started.elapsed(),
        };

        self.stats
            .record_shutdown_loss(report.lost_records, report.lost_batches);
        self.stats.publish(&running.buffer.stats());

        if report.lost_records > 0 {
            error!(
                "Shutdown discarded {} records ({} batches) after {:?}",
                report.lost_records, report.lost_batches, report.elapsed
            );
        } else {
            info!("Log pipeline stopped cleanly in {:?}", report.elapsed);
        }

        report
    }
}

fn ensure_runtime() -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|e| PipelineError::Runtime(format!("start requires a tokio runtime: {}", e)))
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
