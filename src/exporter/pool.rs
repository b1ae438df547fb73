// src/exporter/pool.rs
//! Bounded in-flight queue and export workers
//!
//! `dispatch` never awaits: a full queue evicts or refuses per
//! `InFlightOverflow`, so the batcher can never be backed up by a slow
//! collector. Each worker owns one batch at a time and carries it through
//! every retry before taking the next.
//!
//! Shutdown is two-phase:
//!
//! 1. **closing**: no idle waiting; workers drain the queue and exit
//! 2. **hard stop** (deadline reached): in-flight sends and backoff sleeps
//!    are abandoned, and everything not delivered is counted as lost

use crate::encoding::EncodedBatch;
use crate::exporter::retry::{ExportAttempt, RetryDecision, RetryPolicy};
use crate::exporter::{InFlightOverflow, SendOutcome, Transport};
use crate::observability::{DropCause, PipelineStats};
use crate::utils::clock::Clock;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of handing a batch to the exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Queued,

    /// Queued after evicting the oldest pending batch
    QueuedEvictedOldest,

    /// Queue full under `InFlightOverflow::Reject`, or the exporter is
    /// shutting down; the batch is dropped and counted
    Rejected,
}

/// What the exporter failed to deliver before stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExporterDrain {
    pub lost_batches: u64,
    pub lost_records: u64,

    /// True when every worker finished before the deadline
    pub completed: bool,
}

struct Shared {
    queue: ArrayQueue<EncodedBatch>,
    overflow: InFlightOverflow,
    work: Notify,
    closed: AtomicBool,
    closing: CancellationToken,
    hard_stop: CancellationToken,
    in_flight: AtomicUsize,

    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    stats: Arc<PipelineStats>,

    lost_batches: AtomicU64,
    lost_records: AtomicU64,
}

/// Export stage: bounded queue plus `concurrency` worker tasks.
///
/// Delivery is at-least-once. A retried send may duplicate records at the
/// collector; nothing here deduplicates.
pub struct Exporter {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Exporter {
    /// Spawn the worker pool on the current tokio runtime
    pub fn start(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        stats: Arc<PipelineStats>,
        concurrency: usize,
        queue_capacity: usize,
        overflow: InFlightOverflow,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(queue_capacity.max(1)),
            overflow,
            work: Notify::new(),
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
            in_flight: AtomicUsize::new(0),
            transport,
            clock,
            retry,
            stats,
            lost_batches: AtomicU64::new(0),
            lost_records: AtomicU64::new(0),
        });

        let workers = (0..concurrency)
            .map(|id| tokio::spawn(run_worker(Arc::clone(&shared), id)))
            .collect();

        info!(
            "Exporter started: {} transport, {} workers, queue of {}",
            shared.transport.name(),
            concurrency,
            shared.queue.capacity()
        );

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queue a batch for delivery without waiting
    pub fn dispatch(&self, batch: EncodedBatch) -> DispatchOutcome {
        let s = &*self.shared;

        if s.closed.load(Ordering::Acquire) {
            warn!(
                "Exporter closed, discarding batch {} ({} records)",
                batch.sequence, batch.record_count
            );
            s.lose(&batch);
            return DispatchOutcome::Rejected;
        }

        let outcome = match s.overflow {
            InFlightOverflow::DropOldest => match s.queue.force_push(batch) {
                None => DispatchOutcome::Queued,
                Some(evicted) => {
                    warn!(
                        "Export queue full, dropping oldest batch {} ({} records)",
                        evicted.sequence, evicted.record_count
                    );
                    s.stats
                        .record_dropped(DropCause::Backpressure, evicted.record_count);
                    DispatchOutcome::QueuedEvictedOldest
                }
            },
            InFlightOverflow::Reject => match s.queue.push(batch) {
                Ok(()) => DispatchOutcome::Queued,
                Err(refused) => {
                    warn!(
                        "Export queue full, rejecting batch {} ({} records)",
                        refused.sequence, refused.record_count
                    );
                    s.stats
                        .record_dropped(DropCause::Backpressure, refused.record_count);
                    return DispatchOutcome::Rejected;
                }
            },
        };

        s.work.notify_one();
        outcome
    }

    /// Batches waiting for a worker
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Batches currently being sent or backing off
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Drain the queue, waiting until `deadline` for workers to finish.
    ///
    /// Past the deadline in-flight sends are aborted; an aborted send counts
    /// as a retryable failure and its batch as lost. Batches dispatched once
    /// shutdown has begun are refused and counted as lost.
    pub async fn shutdown(&self, deadline: Instant) -> ExporterDrain {
        let s = &*self.shared;
        s.closed.store(true, Ordering::Release);
        s.closing.cancel();

        let handles = std::mem::take(&mut *self.workers.lock());
        let all = futures::future::join_all(handles);
        tokio::pin!(all);

        let completed = match tokio::time::timeout_at(deadline, &mut all).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "Export drain deadline reached with {} in flight, {} queued",
                    self.in_flight(),
                    self.pending()
                );
                s.hard_stop.cancel();
                all.await;
                false
            }
        };

        while let Some(batch) = s.queue.pop() {
            s.lose(&batch);
        }

        let drain = ExporterDrain {
            lost_batches: s.lost_batches.load(Ordering::Acquire),
            lost_records: s.lost_records.load(Ordering::Acquire),
            completed,
        };
        debug!("Exporter stopped: {:?}", drain);
        drain
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.shared.hard_stop.cancel();
    }
}

async fn run_worker(shared: Arc<Shared>, id: usize) {
    debug!("Export worker {} started", id);

    loop {
        if shared.hard_stop.is_cancelled() {
            break;
        }

        match shared.queue.pop() {
            Some(batch) => {
                shared.in_flight.fetch_add(1, Ordering::AcqRel);
                shared.deliver(batch).await;
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            None if shared.closing.is_cancelled() => break,
            None => {
                tokio::select! {
                    _ = shared.work.notified() => {}
                    _ = shared.closing.cancelled() => {}
                    _ = shared.hard_stop.cancelled() => {}
                }
            }
        }
    }

    debug!("Export worker {} stopped", id);
}

impl Shared {
    /// Carry one batch through send and retry until a terminal outcome
    async fn deliver(&self, batch: EncodedBatch) {
        let mut attempt = ExportAttempt::new(batch);

        loop {
            attempt.begin(self.clock.now());
            self.stats.record_attempt();

            let outcome = tokio::select! {
                biased;
                _ = self.hard_stop.cancelled() => {
                    self.stats.record_retryable_failure();
                    warn!(
                        "Send of batch {} aborted at shutdown deadline (attempt {})",
                        attempt.batch.sequence, attempt.attempts
                    );
                    self.lose(&attempt.batch);
                    return;
                }
                outcome = self.transport.send(attempt.batch.payload.clone()) => outcome,
            };

            match outcome {
                SendOutcome::Success { rejected_records } => {
                    debug!(
                        "Batch {} exported ({} records, attempt {})",
                        attempt.batch.sequence, attempt.batch.record_count, attempt.attempts
                    );
                    self.stats
                        .record_exported(attempt.batch.record_count, rejected_records);
                    return;
                }
                SendOutcome::Fatal { reason } => {
                    self.stats.record_fatal_failure();
                    self.stats
                        .record_dropped(DropCause::Fatal, attempt.batch.record_count);
                    error!(
                        "Batch {} dropped ({} records): collector refused it: {}",
                        attempt.batch.sequence, attempt.batch.record_count, reason
                    );
                    return;
                }
                SendOutcome::Retryable {
                    reason,
                    retry_after,
                } => {
                    self.stats.record_retryable_failure();

                    match self.retry.decide(&attempt, self.clock.now(), retry_after) {
                        RetryDecision::GiveUp => {
                            self.stats.record_dropped(
                                DropCause::RetriesExhausted,
                                attempt.batch.record_count,
                            );
                            warn!(
                                "Batch {} dropped ({} records) after {} attempts: {}",
                                attempt.batch.sequence,
                                attempt.batch.record_count,
                                attempt.attempts,
                                reason
                            );
                            return;
                        }
                        RetryDecision::RetryAfter(delay) => {
                            debug!(
                                "Batch {} attempt {} failed ({}), retrying in {:?}",
                                attempt.batch.sequence, attempt.attempts, reason, delay
                            );
                            tokio::select! {
                                biased;
                                _ = self.hard_stop.cancelled() => {
                                    self.lose(&attempt.batch);
                                    return;
                                }
                                _ = self.clock.sleep(delay) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    fn lose(&self, batch: &EncodedBatch) {
        self.lost_batches.fetch_add(1, Ordering::AcqRel);
        self.lost_records
            .fetch_add(batch.record_count as u64, Ordering::AcqRel);
    }
}
