// src/buffer/mod.rs
//! Bounded hand-off between producer threads and the batcher
//!
//! - **RingBuffer**: cloneable multi-producer handle, `submit` never panics
//!   and never blocks beyond the configured timeout
//! - **RingConsumer**: the single consumer, owned by the batcher task
//! - **OverflowPolicy**: what a full buffer does with a new record
//!
//! # Performance
//!
//! - Lock-free `ArrayQueue` for every policy except `Block`, which parks the
//!   producer on a condition variable only while the buffer is full
//! - Counters are relaxed atomics; the metrics facade is fed by the batcher,
//!   not from the submit path

pub mod ring_buffer;

pub use ring_buffer::{
    BufferStats, OverflowPolicy, RejectReason, RejectionCounts, RingBuffer, RingConsumer,
    SubmitOutcome,
};
