// src/buffer/ring_buffer.rs
//! Fixed-capacity multi-producer, single-consumer record buffer
//!
//! Acceptance order into the underlying queue is the drain order (FIFO).
//! The consumer side is a separate, non-`Clone` handle so only one task can
//! ever drain.

use crate::model::Record;
use crossbeam::queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::trace;

/// Behaviour of `submit` when the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait up to the block timeout for space, then reject
    Block,

    /// Evict the oldest buffered record and accept the new one
    #[default]
    DropOldest,

    /// Discard the incoming record
    DropNewest,

    /// Reject immediately
    Reject,
}

/// Why a record did not stay in the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RejectReason {
    /// Buffer full under `OverflowPolicy::Reject`
    Full,

    /// Displaced by a newer record under `OverflowPolicy::DropOldest`; the
    /// newer submission itself is `Accepted`
    Evicted,

    /// Buffer full under `OverflowPolicy::DropNewest`
    Dropped,

    /// Buffer still full when the block timeout expired
    Timeout,

    /// Pipeline has not been started
    NotStarted,

    /// Pipeline is shutting down
    Closed,
}

impl RejectReason {
    pub const ALL: [RejectReason; 6] = [
        RejectReason::Full,
        RejectReason::Evicted,
        RejectReason::Dropped,
        RejectReason::Timeout,
        RejectReason::NotStarted,
        RejectReason::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Full => "full",
            RejectReason::Evicted => "evicted",
            RejectReason::Dropped => "dropped",
            RejectReason::Timeout => "timeout",
            RejectReason::NotStarted => "not_started",
            RejectReason::Closed => "closed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SubmitOutcome {
    Accepted,
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

struct Shared {
    queue: ArrayQueue<Record>,
    policy: OverflowPolicy,
    block_timeout: Duration,

    /// Occupancy at which the consumer is woken early
    wake_threshold: usize,
    consumer_wake: Notify,

    space_lock: Mutex<()>,
    space_available: Condvar,
    waiting_producers: AtomicUsize,

    closed: AtomicBool,

    accepted: AtomicU64,
    rejected: [AtomicU64; RejectReason::ALL.len()],
    drained: AtomicU64,
}

/// Producer handle
#[derive(Clone)]
pub struct RingBuffer {
    shared: Arc<Shared>,
}

/// Consumer handle; exactly one exists per buffer
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Create a buffer and its consumer.
    ///
    /// `wake_threshold` is the occupancy at which the consumer is notified
    /// (normally the batch size); the consumer is also notified whenever a
    /// submission finds the buffer empty.
    pub fn bounded(
        capacity: usize,
        policy: OverflowPolicy,
        block_timeout: Duration,
        wake_threshold: usize,
    ) -> (RingBuffer, RingConsumer) {
        let capacity = capacity.max(1);
        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(capacity),
            policy,
            block_timeout,
            wake_threshold: wake_threshold.clamp(1, capacity),
            consumer_wake: Notify::new(),
            space_lock: Mutex::new(()),
            space_available: Condvar::new(),
            waiting_producers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
            rejected: Default::default(),
            drained: AtomicU64::new(0),
        });

        (
            RingBuffer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }

    /// Submit a record. Total: always returns, never panics.
    pub fn submit(&self, record: Record) -> SubmitOutcome {
        let s = &*self.shared;

        if s.closed.load(Ordering::Acquire) {
            return self.rejected(RejectReason::Closed);
        }

        let outcome = match s.policy {
            OverflowPolicy::DropOldest => {
                if s.queue.force_push(record).is_some() {
                    s.count_rejection(RejectReason::Evicted);
                }
                SubmitOutcome::Accepted
            }
            OverflowPolicy::DropNewest => match s.queue.push(record) {
                Ok(()) => SubmitOutcome::Accepted,
                Err(_) => SubmitOutcome::Rejected(RejectReason::Dropped),
            },
            OverflowPolicy::Reject => match s.queue.push(record) {
                Ok(()) => SubmitOutcome::Accepted,
                Err(_) => SubmitOutcome::Rejected(RejectReason::Full),
            },
            OverflowPolicy::Block => match s.queue.push(record) {
                Ok(()) => SubmitOutcome::Accepted,
                Err(record) => self.push_blocking(record),
            },
        };

        match outcome {
            SubmitOutcome::Accepted => {
                s.accepted.fetch_add(1, Ordering::Relaxed);
                self.wake_consumer();
                outcome
            }
            SubmitOutcome::Rejected(reason) => self.rejected(reason),
        }
    }

    fn push_blocking(&self, mut record: Record) -> SubmitOutcome {
        let s = &*self.shared;
        let deadline = Instant::now() + s.block_timeout;

        // buffer is full: make sure the consumer is draining
        s.consumer_wake.notify_one();

        let mut guard = s.space_lock.lock();
        s.waiting_producers.fetch_add(1, Ordering::SeqCst);

        let outcome = loop {
            if s.closed.load(Ordering::SeqCst) {
                break SubmitOutcome::Rejected(RejectReason::Closed);
            }
            match s.queue.push(record) {
                Ok(()) => break SubmitOutcome::Accepted,
                Err(returned) => record = returned,
            }
            if s.space_available.wait_until(&mut guard, deadline).timed_out() {
                break match s.queue.push(record) {
                    Ok(()) => SubmitOutcome::Accepted,
                    Err(_) => SubmitOutcome::Rejected(RejectReason::Timeout),
                };
            }
        };

        s.waiting_producers.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn rejected(&self, reason: RejectReason) -> SubmitOutcome {
        self.shared.count_rejection(reason);
        trace!("Submission rejected: {}", reason);
        SubmitOutcome::Rejected(reason)
    }

    fn wake_consumer(&self) {
        let s = &*self.shared;
        let len = s.queue.len();
        if len == 1 || len >= s.wake_threshold {
            s.consumer_wake.notify_one();
        }
    }

    /// Stop accepting records; blocked producers are released with `Closed`
    pub fn close(&self) {
        let s = &*self.shared;
        s.closed.store(true, Ordering::SeqCst);
        let _guard = s.space_lock.lock();
        s.space_available.notify_all();
        s.consumer_wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Current occupancy
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.shared.policy
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }
}

impl RingConsumer {
    /// Remove up to `max` records in acceptance order
    pub fn drain_up_to(&mut self, max: usize) -> Vec<Record> {
        let s = &*self.shared;
        let mut out = Vec::with_capacity(max.min(s.queue.len()));

        while out.len() < max {
            match s.queue.pop() {
                Some(record) => out.push(record),
                None => break,
            }
        }

        if !out.is_empty() {
            s.drained.fetch_add(out.len() as u64, Ordering::Relaxed);
            if s.waiting_producers.load(Ordering::SeqCst) > 0 {
                let _guard = s.space_lock.lock();
                s.space_available.notify_all();
            }
        }

        out
    }

    /// Wait until producers signal new records (or the buffer is closed)
    pub async fn notified(&self) {
        self.shared.consumer_wake.notified().await;
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }
}

impl Shared {
    fn count_rejection(&self, reason: RejectReason) {
        self.rejected[reason as usize].fetch_add(1, Ordering::Relaxed);
    }

    fn stats(&self) -> BufferStats {
        let mut rejections = RejectionCounts::default();
        for reason in RejectReason::ALL {
            rejections.add(reason, self.rejected[reason as usize].load(Ordering::Relaxed));
        }

        BufferStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: rejections.total(),
            evicted: rejections.evicted,
            rejections,
            drained: self.drained.load(Ordering::Relaxed),
            occupancy: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }
}

/// Buffer statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BufferStats {
    /// Submissions accepted into the buffer
    pub accepted: u64,

    /// Records refused or displaced, every reason included
    pub rejected: u64,

    /// Accepted records later evicted by `DropOldest`
    pub evicted: u64,

    /// `rejected` split by reason
    pub rejections: RejectionCounts,

    /// Records handed to the consumer
    pub drained: u64,

    /// Current occupancy
    pub occupancy: usize,

    pub capacity: usize,
}

impl BufferStats {
    /// Records lost to overload: full, evicted, dropped or timed out
    pub fn total_lost(&self) -> u64 {
        self.rejections.overload()
    }

    /// Calculate fill percentage
    pub fn fill_percentage(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            (self.occupancy as f64 / self.capacity as f64) * 100.0
        }
    }
}

/// Rejection counters by reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RejectionCounts {
    pub full: u64,
    pub evicted: u64,
    pub dropped: u64,
    pub timeout: u64,
    pub not_started: u64,
    pub closed: u64,
}

impl RejectionCounts {
    pub fn get(&self, reason: RejectReason) -> u64 {
        match reason {
            RejectReason::Full => self.full,
            RejectReason::Evicted => self.evicted,
            RejectReason::Dropped => self.dropped,
            RejectReason::Timeout => self.timeout,
            RejectReason::NotStarted => self.not_started,
            RejectReason::Closed => self.closed,
        }
    }

    pub fn add(&mut self, reason: RejectReason, count: u64) {
        let slot = match reason {
            RejectReason::Full => &mut self.full,
            RejectReason::Evicted => &mut self.evicted,
            RejectReason::Dropped => &mut self.dropped,
            RejectReason::Timeout => &mut self.timeout,
            RejectReason::NotStarted => &mut self.not_started,
            RejectReason::Closed => &mut self.closed,
        };
        *slot += count;
    }

    pub fn total(&self) -> u64 {
        RejectReason::ALL.iter().map(|r| self.get(*r)).sum()
    }

    /// Rejections caused by a full buffer
    pub fn overload(&self) -> u64 {
        self.full + self.evicted + self.dropped + self.timeout
    }
}
