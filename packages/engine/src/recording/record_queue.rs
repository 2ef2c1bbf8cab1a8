// packages/engine/src/recording/record_queue.rs
//! Lock-free queue of finalized records awaiting persistence
//!
//! Sits between the correlator's finalize path and the background writer
//! so a slow store never stalls correlation.

use crate::recording::record::RequestRecord;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded MPMC queue of finalized records
pub struct RecordQueue {
    queue: ArrayQueue<RequestRecord>,
    push_count: AtomicU64,
    pop_count: AtomicU64,
    /// Pushes rejected because the queue was full
    reject_count: AtomicU64,
}

impl RecordQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            push_count: AtomicU64::new(0),
            pop_count: AtomicU64::new(0),
            reject_count: AtomicU64::new(0),
        }
    }

    /// Push a record (non-blocking); hands it back if the queue is full
    pub fn push(&self, record: RequestRecord) -> Result<(), RequestRecord> {
        match self.queue.push(record) {
            Ok(()) => {
                self.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(record) => {
                self.reject_count.fetch_add(1, Ordering::Relaxed);
                Err(record)
            }
        }
    }

    /// Pop up to `max` records in FIFO order
    pub fn pop_batch(&self, max: usize) -> Vec<RequestRecord> {
        let mut batch = Vec::with_capacity(max.min(self.queue.len()));
        while batch.len() < max {
            match self.queue.pop() {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        self.pop_count.fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            push_count: self.push_count.load(Ordering::Relaxed),
            pop_count: self.pop_count.load(Ordering::Relaxed),
            reject_count: self.reject_count.load(Ordering::Relaxed),
            current_size: self.queue.len(),
            capacity: self.queue.capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub push_count: u64,
    pub pop_count: u64,
    pub reject_count: u64,
    pub current_size: usize,
    pub capacity: usize,
}

impl QueueStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }
}
