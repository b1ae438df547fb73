// src/batcher/mod.rs
//! Batcher task
//!
//! Single consumer of the ring buffer. Records are moved into a
//! `BatchBuilder`; a batch is sealed, encoded and handed to the exporter when
//! whichever comes first:
//!
//! - the record-count or byte ceiling is reached
//! - `flush_interval` has passed since the batch's first record
//! - an explicit flush is requested
//! - shutdown is signalled (final drain)
//!
//! ```text
//!            records           ceiling / timer / flush
//!   IDLE ──────────────▶ ACCUMULATING ─────────────────▶ FLUSHING ──▶ IDLE
//!     └──────────── shutdown (from any state) ─────────▶ SHUTDOWN
//! ```
//!
//! The batcher never retries and never waits on the network: the exporter's
//! `dispatch` is non-blocking.
//!
//! If the final drain overruns the shutdown deadline the batcher is told to
//! abandon: it stops draining, discards its open batch and reports the
//! discarded record count, so every drained record is either dispatched or
//! reported.

use crate::buffer::RingConsumer;
use crate::encoding::OtlpEncoder;
use crate::exporter::{DispatchOutcome, Exporter};
use crate::model::{Batch, BatchBuilder};
use crate::observability::PipelineStats;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Batcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatcherState {
    /// No open batch
    Idle = 0,

    /// Open batch waiting for a trigger
    Accumulating = 1,

    /// Sealing and handing batches to the exporter
    Flushing = 2,

    /// Terminal
    Shutdown = 3,
}

impl BatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BatcherState::Idle,
            1 => BatcherState::Accumulating,
            2 => BatcherState::Flushing,
            _ => BatcherState::Shutdown,
        }
    }
}

/// Records and batches produced by the final drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatcherExit {
    pub final_records: usize,
    pub final_batches: usize,

    /// Records discarded from the open batch after the deadline
    pub abandoned_records: usize,

    /// False when the deadline cut the final drain short
    pub completed: bool,
}

/// Batching limits
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_records: usize,
    pub max_bytes: usize,
    pub flush_interval: Duration,
}

/// Control side of a running batcher
pub struct BatcherHandle {
    state: Arc<AtomicU8>,
    flush: Arc<Notify>,
    shutdown: CancellationToken,
    abandon: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<BatcherExit>>>,
}

impl BatcherHandle {
    pub fn state(&self) -> BatcherState {
        BatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the batcher to seal its open batch now
    pub fn flush(&self) {
        self.flush.notify_one();
    }

    /// Signal shutdown and wait up to `deadline` for the final drain.
    ///
    /// Past the deadline the batcher is told to abandon and is awaited once
    /// more; it stops at the next drain step, so the task has always finished
    /// when this returns. Records it abandoned are in
    /// `BatcherExit::abandoned_records`; records it never drained are still in
    /// the ring buffer.
    ///
    /// Returns `None` when the batcher was already stopped or its task failed.
    pub async fn shutdown(&self, deadline: Instant) -> Option<BatcherExit> {
        self.shutdown.cancel();

        let mut task = self.task.lock().take()?;
        let joined = match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Batcher did not finish its final drain before the deadline, abandoning");
                self.abandon.store(true, Ordering::Release);
                task.await
            }
        };

        match joined {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!("Batcher task failed: {}", e);
                None
            }
        }
    }
}

impl Drop for BatcherHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Owns the consumer end of the ring buffer and the open batch
pub struct Batcher {
    consumer: RingConsumer,
    builder: BatchBuilder,
    encoder: OtlpEncoder,
    exporter: Arc<Exporter>,
    stats: Arc<PipelineStats>,
    limits: BatchLimits,

    /// Records drained per wake before yielding back to the runtime
    drain_budget: usize,

    state: Arc<AtomicU8>,
    flush: Arc<Notify>,
    shutdown: CancellationToken,
    abandon: Arc<AtomicBool>,
}

enum Wake {
    Shutdown,
    Flush,
    Timer,
    Records,
}

impl Batcher {
    pub fn new(
        consumer: RingConsumer,
        builder: BatchBuilder,
        encoder: OtlpEncoder,
        exporter: Arc<Exporter>,
        stats: Arc<PipelineStats>,
        limits: BatchLimits,
    ) -> Self {
        let drain_budget = consumer.stats().capacity.max(limits.max_records);
        Self {
            consumer,
            builder,
            encoder,
            exporter,
            stats,
            limits,
            drain_budget,
            state: Arc::new(AtomicU8::new(BatcherState::Idle as u8)),
            flush: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            abandon: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn onto the current tokio runtime
    pub fn spawn(self) -> BatcherHandle {
        let handle = BatcherHandle {
            state: Arc::clone(&self.state),
            flush: Arc::clone(&self.flush),
            shutdown: self.shutdown.clone(),
            abandon: Arc::clone(&self.abandon),
            task: Mutex::new(None),
        };
        *handle.task.lock() = Some(tokio::spawn(self.run()));
        handle
    }

    async fn run(mut self) -> BatcherExit {
        info!(
            "Batcher started: {} records / {} bytes / {:?}",
            self.limits.max_records, self.limits.max_bytes, self.limits.flush_interval
        );

        loop {
            self.drain_available();
            self.seal_if_due();
            self.stats.publish(&self.consumer.stats());
            self.set_state(if self.builder.is_empty() {
                BatcherState::Idle
            } else {
                BatcherState::Accumulating
            });

            // idle: poll at the interval as well, in case a wake-up was missed
            let deadline = self
                .builder
                .deadline(self.limits.flush_interval)
                .unwrap_or_else(|| Instant::now() + self.limits.flush_interval);

            let wake = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                _ = self.flush.notified() => Wake::Flush,
                _ = sleep_until(deadline) => Wake::Timer,
                _ = self.consumer.notified() => Wake::Records,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Flush => {
                    self.drain_available();
                    self.seal_and_dispatch("flush");
                }
                Wake::Timer => trace!("Batcher timer fired"),
                Wake::Records => {}
            }
        }

        let exit = self.final_drain();
        self.set_state(BatcherState::Shutdown);
        self.stats.publish(&self.consumer.stats());
        info!(
            "Batcher stopped: final drain sealed {} records into {} batches, {} abandoned",
            exit.final_records, exit.final_batches, exit.abandoned_records
        );
        exit
    }

    /// Move buffered records into the open batch, sealing full batches
    fn drain_available(&mut self) -> (usize, usize) {
        let mut drained = 0;
        let mut sealed = 0;

        while drained < self.drain_budget && !self.abandoned() {
            let room = self.builder.remaining().max(1);
            let records = self.consumer.drain_up_to(room.min(self.drain_budget - drained));
            if records.is_empty() {
                break;
            }
            drained += records.len();

            for record in records {
                if let Some(batch) = self.builder.push(record) {
                    self.dispatch(batch, "size");
                    sealed += 1;
                }
            }
            if self.builder.is_full() {
                if self.seal_and_dispatch("size") {
                    sealed += 1;
                }
            }
        }

        (drained, sealed)
    }

    fn seal_if_due(&mut self) {
        if let Some(deadline) = self.builder.deadline(self.limits.flush_interval) {
            if Instant::now() >= deadline {
                self.seal_and_dispatch("interval");
            }
        }
    }

    fn seal_and_dispatch(&mut self, trigger: &'static str) -> bool {
        match self.builder.seal() {
            Some(batch) => {
                self.dispatch(batch, trigger);
                true
            }
            None => false,
        }
    }

    fn dispatch(&self, batch: Batch, trigger: &'static str) {
        self.set_state(BatcherState::Flushing);
        self.stats.record_flush(batch.len());

        let encoded = self.encoder.encode(&batch);
        self.stats.record_coercions(encoded.coerced_fields);

        debug!(
            "Sealed batch {} ({} records, ~{} bytes) on {}",
            batch.sequence(),
            batch.len(),
            batch.estimated_bytes(),
            trigger
        );

        if self.exporter.dispatch(encoded) == DispatchOutcome::Rejected {
            debug!("Batch {} refused by a full export queue", batch.sequence());
        }
    }

    /// Drain whatever the (closed) buffer still holds and flush it
    fn final_drain(&mut self) -> BatcherExit {
        let open = self.builder.len();
        let mut exit = BatcherExit {
            completed: true,
            ..BatcherExit::default()
        };

        loop {
            let (drained, sealed) = self.drain_available();
            exit.final_records += drained;
            exit.final_batches += sealed;
            if drained == 0 {
                break;
            }
        }
        exit.final_records += open;

        if self.abandoned() {
            let discarded = self.builder.seal().map_or(0, |batch| batch.len());
            if discarded > 0 {
                warn!("Batcher abandoned {} records at the shutdown deadline", discarded);
            }
            exit.final_records -= discarded;
            exit.abandoned_records = discarded;
            exit.completed = false;
            return exit;
        }

        if self.seal_and_dispatch("shutdown") {
            exit.final_batches += 1;
        }
        exit
    }

    fn abandoned(&self) -> bool {
        self.abandon.load(Ordering::Acquire)
    }

    fn set_state(&self, state: BatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{OverflowPolicy, RingBuffer};
    use crate::exporter::test_support::ScriptedTransport;
    use crate::exporter::{InFlightOverflow, RetryPolicy};
    use crate::model::{Record, Resource, Scope, Severity};
    use crate::utils::clock::TokioClock;

    struct Harness {
        producer: RingBuffer,
        handle: BatcherHandle,
        exporter: Arc<Exporter>,
        transport: Arc<ScriptedTransport>,
        stats: Arc<PipelineStats>,
    }

    fn harness(capacity: usize, max_records: usize, interval: Duration) -> Harness {
        let (producer, consumer) =
            RingBuffer::bounded(capacity, OverflowPolicy::DropOldest, Duration::ZERO, max_records);
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let stats = Arc::new(PipelineStats::new());
        let exporter = Arc::new(Exporter::start(
            transport.clone(),
            Arc::new(TokioClock),
            RetryPolicy::default(),
            Arc::clone(&stats),
            1,
            64,
            InFlightOverflow::Reject,
        ));
        let resource = Arc::new(Resource::default());
        let batcher = Batcher::new(
            consumer,
            BatchBuilder::new(max_records, usize::MAX, resource),
            OtlpEncoder::new(&Scope::default()),
            Arc::clone(&exporter),
            Arc::clone(&stats),
            BatchLimits {
                max_records,
                max_bytes: usize::MAX,
                flush_interval: interval,
            },
        );
        Harness {
            producer,
            handle: batcher.spawn(),
            exporter,
            transport,
            stats,
        }
    }

    fn submit_n(producer: &RingBuffer, prefix: &str, n: usize) {
        for i in 0..n {
            assert!(producer
                .submit(Record::new(Severity::Info, format!("{}{}", prefix, i)))
                .is_accepted());
        }
    }

    async fn stop(h: &Harness) -> Option<BatcherExit> {
        let deadline = Instant::now() + Duration::from_secs(30);
        h.producer.close();
        let exit = h.handle.shutdown(deadline).await;
        h.exporter.shutdown(deadline).await;
        exit
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_seals_full_batches() {
        let h = harness(1000, 10, Duration::from_secs(60));
        submit_n(&h.producer, "r", 25);

        // let the batcher run; the interval is far away
        tokio::time::sleep(Duration::from_millis(1)).await;

        let snap = h.stats.snapshot(&h.producer.stats());
        assert_eq!(snap.batches_flushed, 2);
        assert_eq!(snap.records_flushed, 20);
        assert_eq!(h.handle.state(), BatcherState::Accumulating);

        let exit = stop(&h).await.unwrap();
        assert_eq!(exit.final_records, 5);
        assert_eq!(exit.final_batches, 1);
        assert_eq!(h.transport.delivered_bodies().len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger_flushes_partial_batch() {
        let h = harness(1000, 100, Duration::from_millis(200));
        submit_n(&h.producer, "r", 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.stats.snapshot(&h.producer.stats()).batches_flushed, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snap = h.stats.snapshot(&h.producer.stats());
        assert_eq!(snap.batches_flushed, 1);
        assert_eq!(snap.records_flushed, 3);
        assert_eq!(h.handle.state(), BatcherState::Idle);

        stop(&h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_flush() {
        let h = harness(1000, 100, Duration::from_secs(60));
        submit_n(&h.producer, "r", 4);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.stats.snapshot(&h.producer.stats()).batches_flushed, 0);

        h.handle.flush();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.stats.snapshot(&h.producer.stats()).batches_flushed, 1);

        stop(&h).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_everything_in_order() {
        let h = harness(1000, 64, Duration::from_secs(60));
        submit_n(&h.producer, "r", 200);

        let exit = stop(&h).await.unwrap();
        assert_eq!(h.handle.state(), BatcherState::Shutdown);

        let total: usize = exit.final_records;
        assert!(total <= 200);

        let bodies = h.transport.delivered_bodies();
        let expected: Vec<String> = (0..200).map(|i| format!("r{}", i)).collect();
        assert_eq!(bodies, expected);
        assert_eq!(h.stats.snapshot(&h.producer.stats()).records_flushed, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_stays_shutdown_after_final_dispatch() {
        let h = harness(1000, 10, Duration::from_secs(60));
        submit_n(&h.producer, "r", 35);

        let exit = stop(&h).await.unwrap();
        assert!(exit.completed);
        assert_eq!(exit.abandoned_records, 0);
        let snap = h.stats.snapshot(&h.producer.stats());
        assert_eq!(snap.batches_flushed, 4);
        assert_eq!(snap.records_flushed, 35);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.handle.state(), BatcherState::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_open_batch() {
        let h = harness(1000, 100, Duration::from_secs(60));
        submit_n(&h.producer, "a", 30);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(h.producer.len(), 0);

        // never drained: the batcher is not polled again before the deadline
        submit_n(&h.producer, "b", 20);
        h.producer.close();

        let exit = h.handle.shutdown(Instant::now()).await.unwrap();
        assert!(!exit.completed);
        assert_eq!(exit.abandoned_records, 30);
        assert_eq!(exit.final_records, 0);
        assert_eq!(exit.final_batches, 0);
        assert_eq!(h.producer.len(), 20);
        assert_eq!(h.handle.state(), BatcherState::Shutdown);

        let snap = h.stats.snapshot(&h.producer.stats());
        assert_eq!(snap.batches_flushed, 0);
        h.exporter.shutdown(Instant::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_twice_returns_none() {
        let h = harness(10, 5, Duration::from_secs(1));
        assert!(stop(&h).await.is_some());
        assert!(h
            .handle
            .shutdown(Instant::now() + Duration::from_secs(1))
            .await
            .is_none());
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            BatcherState::Idle,
            BatcherState::Accumulating,
            BatcherState::Flushing,
            BatcherState::Shutdown,
        ] {
            assert_eq!(BatcherState::from_u8(state as u8), state);
        }
    }
}
