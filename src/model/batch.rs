// src/model/batch.rs
//! Batches and the builder that accumulates them
//!
//! A `BatchBuilder` is owned by the batcher task. Records are moved in one at
//! a time; `seal` moves them out again as an immutable `Batch`.

use crate::model::record::Record;
use crate::model::resource::Resource;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Sealed, immutable group of records
#[derive(Debug)]
pub struct Batch {
    sequence: u64,
    records: Vec<Record>,
    estimated_bytes: usize,
    resource: Arc<Resource>,
    sealed_at: Instant,
}

impl Batch {
    /// Monotonic sequence number assigned at sealing
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Resource for records that carry none of their own
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Accumulates records up to a count and byte ceiling
#[derive(Debug)]
pub struct BatchBuilder {
    max_records: usize,
    max_bytes: usize,
    resource: Arc<Resource>,
    next_sequence: u64,
    records: Vec<Record>,
    bytes: usize,
    opened_at: Option<Instant>,
}

impl BatchBuilder {
    pub fn new(max_records: usize, max_bytes: usize, resource: Arc<Resource>) -> Self {
        let max_records = max_records.max(1);
        Self {
            max_records,
            max_bytes: max_bytes.max(1),
            resource,
            next_sequence: 0,
            records: Vec::with_capacity(max_records.min(1024)),
            bytes: 0,
            opened_at: None,
        }
    }

    /// Add a record.
    ///
    /// Returns the previously accumulated records as a sealed batch when the
    /// new record would push the byte estimate over the ceiling. A single
    /// record larger than the ceiling still forms its own batch.
    pub fn push(&mut self, record: Record) -> Option<Batch> {
        let size = record.estimated_size();

        let sealed = if !self.records.is_empty() && self.bytes + size > self.max_bytes {
            self.seal()
        } else {
            None
        };

        if self.records.is_empty() {
            self.opened_at = Some(Instant::now());
        }
        self.bytes += size;
        self.records.push(record);

        sealed
    }

    /// True once the record-count ceiling is reached
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.max_records || self.bytes >= self.max_bytes
    }

    /// Remaining room before the count ceiling
    pub fn remaining(&self) -> usize {
        self.max_records.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// When the first record of the open batch arrived
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Deadline at which the open batch must be flushed
    pub fn deadline(&self, flush_interval: Duration) -> Option<Instant> {
        self.opened_at.map(|opened| opened + flush_interval)
    }

    /// Seal the open batch, if any, and start a new one
    pub fn seal(&mut self) -> Option<Batch> {
        if self.records.is_empty() {
            return None;
        }

        let records = std::mem::replace(
            &mut self.records,
            Vec::with_capacity(self.max_records.min(1024)),
        );
        let batch = Batch {
            sequence: self.next_sequence,
            records,
            estimated_bytes: self.bytes,
            resource: Arc::clone(&self.resource),
            sealed_at: Instant::now(),
        };

        self.next_sequence += 1;
        self.bytes = 0;
        self.opened_at = None;

        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::Severity;

    fn record(body: &str) -> Record {
        Record::new(Severity::Info, body)
    }

    fn builder(max_records: usize, max_bytes: usize) -> BatchBuilder {
        BatchBuilder::new(max_records, max_bytes, Arc::new(Resource::default()))
    }

    #[test]
    fn test_seal_empty_is_none() {
        let mut b = builder(10, 1024);
        assert!(b.seal().is_none());
        assert!(b.opened_at().is_none());
    }

    #[test]
    fn test_count_ceiling() {
        let mut b = builder(3, usize::MAX);
        for i in 0..3 {
            assert!(b.push(record(&format!("r{}", i))).is_none());
        }
        assert!(b.is_full());

        let batch = b.seal().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.sequence(), 0);
        assert_eq!(batch.records()[0].body, "r0");
        assert!(b.is_empty());
        assert_eq!(b.remaining(), 3);
    }

    #[test]
    fn test_byte_ceiling_seals_previous() {
        let one = record("x").estimated_size();
        let mut b = builder(100, one * 2);

        assert!(b.push(record("x")).is_none());
        assert!(b.push(record("x")).is_none());
        let sealed = b.push(record("x")).expect("third record overflows bytes");

        assert_eq!(sealed.len(), 2);
        assert_eq!(sealed.estimated_bytes(), one * 2);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_oversized_record_gets_own_batch() {
        let mut b = builder(100, 10);
        assert!(b.push(record(&"y".repeat(100))).is_none());
        assert!(b.is_full());
        assert_eq!(b.seal().unwrap().len(), 1);
    }

    #[test]
    fn test_sequences_increase() {
        let mut b = builder(1, 1024);
        b.push(record("a"));
        let first = b.seal().unwrap();
        b.push(record("b"));
        let second = b.seal().unwrap();
        assert_eq!(first.sequence() + 1, second.sequence());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_from_first_record() {
        let mut b = builder(10, 1024);
        let interval = Duration::from_millis(500);
        assert!(b.deadline(interval).is_none());

        b.push(record("a"));
        let opened = b.opened_at().unwrap();
        tokio::time::advance(Duration::from_millis(100)).await;
        b.push(record("b"));

        assert_eq!(b.opened_at(), Some(opened));
        assert_eq!(b.deadline(interval), Some(opened + interval));
    }
}
