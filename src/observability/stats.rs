// src/observability/stats.rs
//! Pipeline counters
//!
//! One `PipelineStats` is shared by the controller, the batcher and every
//! export worker. Each increment is mirrored to the `metrics` facade so an
//! installed recorder (Prometheus in the binary) sees it; buffer-side counters
//! live in the ring buffer itself and are pushed as absolute values by
//! `publish`.

use crate::buffer::{BufferStats, RejectReason, RejectionCounts};
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why the exporter gave up on a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    /// Retryable failures until attempts or elapsed time ran out
    RetriesExhausted,

    /// Collector or transport refused the batch outright
    Fatal,

    /// In-flight queue full
    Backpressure,
}

impl DropCause {
    pub fn as_str(self) -> &'static str {
        match self {
            DropCause::RetriesExhausted => "retries_exhausted",
            DropCause::Fatal => "fatal",
            DropCause::Backpressure => "backpressure",
        }
    }
}

/// Shared pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    rejected_not_started: AtomicU64,

    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
    encoding_coercions: AtomicU64,

    send_attempts: AtomicU64,
    export_retryable_failures: AtomicU64,
    export_fatal_failures: AtomicU64,
    batches_exported: AtomicU64,
    records_exported: AtomicU64,
    records_rejected_by_collector: AtomicU64,

    batches_dropped_exhausted: AtomicU64,
    batches_dropped_fatal: AtomicU64,
    batches_dropped_backpressure: AtomicU64,
    records_dropped_export: AtomicU64,

    shutdown_lost_records: AtomicU64,
    shutdown_lost_batches: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submission refused because the pipeline was never started
    pub fn record_not_started(&self) {
        self.rejected_not_started.fetch_add(1, Ordering::Relaxed);
        counter!("logsink_submissions_rejected_total", "reason" => RejectReason::NotStarted.as_str())
            .increment(1);
    }

    /// A batch was sealed and handed to the export stage
    pub fn record_flush(&self, records: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_flushed.fetch_add(records as u64, Ordering::Relaxed);
        counter!("logsink_batches_flushed_total").increment(1);
        counter!("logsink_records_flushed_total").increment(records as u64);
    }

    pub fn record_coercions(&self, fields: usize) {
        if fields == 0 {
            return;
        }
        self.encoding_coercions.fetch_add(fields as u64, Ordering::Relaxed);
        counter!("logsink_encoding_coercions_total").increment(fields as u64);
    }

    pub fn record_attempt(&self) {
        self.send_attempts.fetch_add(1, Ordering::Relaxed);
        counter!("logsink_send_attempts_total").increment(1);
    }

    pub fn record_retryable_failure(&self) {
        self.export_retryable_failures.fetch_add(1, Ordering::Relaxed);
        counter!("logsink_export_failures_total", "kind" => "retryable").increment(1);
    }

    pub fn record_fatal_failure(&self) {
        self.export_fatal_failures.fetch_add(1, Ordering::Relaxed);
        counter!("logsink_export_failures_total", "kind" => "fatal").increment(1);
    }

    /// Batch delivered; `rejected` records were refused by a partial success
    pub fn record_exported(&self, records: usize, rejected: u64) {
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
        self.records_exported.fetch_add(records as u64, Ordering::Relaxed);
        counter!("logsink_batches_exported_total").increment(1);
        counter!("logsink_records_exported_total").increment(records as u64);

        if rejected > 0 {
            self.records_rejected_by_collector
                .fetch_add(rejected, Ordering::Relaxed);
            counter!("logsink_records_rejected_by_collector_total").increment(rejected);
        }
    }

    /// Batch abandoned by the export stage
    pub fn record_dropped(&self, cause: DropCause, records: usize) {
        let slot = match cause {
            DropCause::RetriesExhausted => &self.batches_dropped_exhausted,
            DropCause::Fatal => &self.batches_dropped_fatal,
            DropCause::Backpressure => &self.batches_dropped_backpressure,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        self.records_dropped_export
            .fetch_add(records as u64, Ordering::Relaxed);
        counter!("logsink_batches_dropped_total", "cause" => cause.as_str()).increment(1);
        counter!("logsink_records_dropped_total", "cause" => cause.as_str())
            .increment(records as u64);
    }

    /// Data still unflushed when the shutdown deadline passed
    pub fn record_shutdown_loss(&self, records: u64, batches: u64) {
        self.shutdown_lost_records.fetch_add(records, Ordering::Relaxed);
        self.shutdown_lost_batches.fetch_add(batches, Ordering::Relaxed);
        counter!("logsink_shutdown_lost_records_total").increment(records);
        counter!("logsink_shutdown_lost_batches_total").increment(batches);
    }

    /// Push buffer-side counters and the occupancy gauge to the metrics facade
    pub fn publish(&self, buffer: &BufferStats) {
        counter!("logsink_submissions_accepted_total").absolute(buffer.accepted);
        for reason in RejectReason::ALL {
            // counted by the controller, not the buffer
            if reason == RejectReason::NotStarted {
                continue;
            }
            counter!("logsink_submissions_rejected_total", "reason" => reason.as_str())
                .absolute(buffer.rejections.get(reason));
        }
        gauge!("logsink_buffer_occupancy").set(buffer.occupancy as f64);
        gauge!("logsink_buffer_capacity").set(buffer.capacity as f64);
    }

    pub fn snapshot(&self, buffer: &BufferStats) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let mut rejections = buffer.rejections;
        rejections.add(RejectReason::NotStarted, load(&self.rejected_not_started));

        StatsSnapshot {
            submissions_accepted: buffer.accepted,
            submissions_rejected: rejections.total(),
            records_evicted: rejections.evicted,
            rejections,
            buffer_occupancy: buffer.occupancy,
            buffer_capacity: buffer.capacity,
            batches_flushed: load(&self.batches_flushed),
            records_flushed: load(&self.records_flushed),
            encoding_coercions: load(&self.encoding_coercions),
            send_attempts: load(&self.send_attempts),
            export_retryable_failures: load(&self.export_retryable_failures),
            export_fatal_failures: load(&self.export_fatal_failures),
            batches_exported: load(&self.batches_exported),
            records_exported: load(&self.records_exported),
            records_rejected_by_collector: load(&self.records_rejected_by_collector),
            batches_dropped_exhausted: load(&self.batches_dropped_exhausted),
            batches_dropped_fatal: load(&self.batches_dropped_fatal),
            batches_dropped_backpressure: load(&self.batches_dropped_backpressure),
            records_dropped_export: load(&self.records_dropped_export),
            shutdown_lost_records: load(&self.shutdown_lost_records),
            shutdown_lost_batches: load(&self.shutdown_lost_batches),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Submissions accepted into the ring buffer
    pub submissions_accepted: u64,

    /// Records refused or evicted, every reason included
    pub submissions_rejected: u64,

    /// Accepted records later evicted by drop-oldest
    pub records_evicted: u64,

    /// `submissions_rejected` by reason
    pub rejections: RejectionCounts,

    pub buffer_occupancy: usize,
    pub buffer_capacity: usize,

    pub batches_flushed: u64,
    pub records_flushed: u64,

    /// Attribute values coerced to strings while encoding
    pub encoding_coercions: u64,

    pub send_attempts: u64,
    pub export_retryable_failures: u64,
    pub export_fatal_failures: u64,

    pub batches_exported: u64,
    pub records_exported: u64,

    /// Records the collector refused inside a partial-success response
    pub records_rejected_by_collector: u64,

    pub batches_dropped_exhausted: u64,
    pub batches_dropped_fatal: u64,
    pub batches_dropped_backpressure: u64,
    pub records_dropped_export: u64,

    pub shutdown_lost_records: u64,
    pub shutdown_lost_batches: u64,
}

impl StatsSnapshot {
    /// Batches the export stage gave up on, for any reason
    pub fn batches_failed(&self) -> u64 {
        self.batches_dropped_exhausted + self.batches_dropped_fatal + self.batches_dropped_backpressure
    }

    /// Records lost to producer-side overload
    pub fn records_lost_to_overload(&self) -> u64 {
        self.rejections.overload()
    }
}
