// packages/engine/src/recording/writer.rs
//! Background writer for finalized records
//!
//! The finalize path only pushes onto a lock-free queue. A background task
//! drains it in batches on a timer or when notified, writes each batch to
//! the record store in one transaction, and mirrors it to the backup ring.
//!
//! ```text
//! on_phase3() → RecordQueue → Background Writer
//!                                  ↓
//!                       Batch (up to batch_size)
//!                                  ↓
//!                 RecordStore.insert_batch (ids assigned)
//!                                  ↓
//!                       BackupRing.push_batch
//! ```
//!
//! A failed store write still reaches the backup ring, without ids.

use crate::observability::{PERSIST_FAILURES, QUEUE_DEPTH, RECORDS_PERSISTED};
use crate::recording::backup_ring::BackupRing;
use crate::recording::record::RequestRecord;
use crate::recording::record_queue::RecordQueue;
use crate::recording::storage::RecordStore;
use crate::utils::config::WriterSettings;
use crate::utils::errors::{EngineError, Result};
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Decouples persistence from correlation
pub struct RecordWriter {
    config: WriterSettings,
    queue: RecordQueue,
    store: Arc<RecordStore>,
    backup: Arc<BackupRing>,
    flush_notify: Notify,
    /// Keeps concurrent drains from reordering batches
    drain_lock: Mutex<()>,
    persisted: AtomicU64,
    store_failures: AtomicU64,
    backup_failures: AtomicU64,
    batches: AtomicU64,
    total_flush_time_ms: AtomicU64,
}

impl RecordWriter {
    pub fn new(config: WriterSettings, store: Arc<RecordStore>, backup: Arc<BackupRing>) -> Self {
        Self {
            queue: RecordQueue::new(config.queue_capacity),
            config,
            store,
            backup,
            flush_notify: Notify::new(),
            drain_lock: Mutex::new(()),
            persisted: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            backup_failures: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            total_flush_time_ms: AtomicU64::new(0),
        }
    }

    /// Queue a finalized record for persistence (non-blocking)
    pub fn submit(&self, record: RequestRecord) -> Result<()> {
        self.queue.push(record).map_err(|rejected| {
            error!("Writer queue full, dropping {} {}", rejected.method, rejected.url);
            EngineError::RecordingFailed("Record queue full".to_string())
        })?;

        gauge!(QUEUE_DEPTH).set(self.queue.len() as f64);
        if self.queue.len() >= self.config.batch_size {
            self.flush_notify.notify_one();
        }
        Ok(())
    }

    /// Start the background drain loop; a final flush runs on cancel
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let writer = Arc::clone(self);
        let flush_interval = Duration::from_millis(self.config.flush_interval_ms);

        tokio::spawn(async move {
            info!("Record writer started (flush every {:?})", flush_interval);
            let mut interval = tokio::time::interval(flush_interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = writer.flush().await {
                            error!("Final flush failed: {}", e);
                        }
                        if let Err(e) = writer.backup.sync().await {
                            error!("Final backup ring write failed: {}", e);
                        }
                        info!("Record writer stopped");
                        break;
                    }
                    _ = interval.tick() => {}
                    _ = writer.flush_notify.notified() => {}
                }

                if let Err(e) = writer.flush().await {
                    error!("Failed to persist records: {}", e);
                }
            }
        })
    }

    /// Drain everything queued; returns records written to both store and backup ring
    ///
    /// Every batch is attempted even after a failure; the first error is returned.
    /// A backup ring write deferred by its persist interval is retried here.
    pub async fn flush(&self) -> Result<usize> {
        let _guard = self.drain_lock.lock().await;
        let mut written = 0;
        let mut first_error = None;

        loop {
            let (drained, result) = self.drain_batch().await;
            if drained == 0 {
                break;
            }
            match result {
                Ok(()) => written += drained,
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Err(e) = self.backup.persist_if_due().await {
            error!("Backup ring write failed: {}", e);
            first_error.get_or_insert(e);
        }

        gauge!(QUEUE_DEPTH).set(self.queue.len() as f64);
        match first_error {
            Some(error) => Err(error),
            None => Ok(written),
        }
    }

    async fn drain_batch(&self) -> (usize, Result<()>) {
        let mut batch = self.queue.pop_batch(self.config.batch_size);
        if batch.is_empty() {
            return (0, Ok(()));
        }
        let drained = batch.len();
        let start = Instant::now();

        let stored = self.store.insert_batch(&batch).await;
        match &stored {
            Ok(ids) => {
                for (record, id) in batch.iter_mut().zip(ids) {
                    record.id = Some(*id);
                }
                self.persisted.fetch_add(drained as u64, Ordering::Relaxed);
                counter!(RECORDS_PERSISTED).increment(drained as u64);
            }
            Err(e) => {
                error!("Record store rejected {} records: {}", drained, e);
                self.store_failures.fetch_add(drained as u64, Ordering::Relaxed);
                counter!(PERSIST_FAILURES, "target" => "store").increment(drained as u64);
            }
        }

        let mirrored = self.backup.push_batch(batch).await;
        if let Err(e) = &mirrored {
            error!("Backup ring write failed: {}", e);
            self.backup_failures.fetch_add(drained as u64, Ordering::Relaxed);
            counter!(PERSIST_FAILURES, "target" => "backup").increment(drained as u64);
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.total_flush_time_ms
            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        debug!("Batch of {} records flushed in {:?}", drained, start.elapsed());

        (drained, stored.and(mirrored))
    }

    /// Records waiting in the queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> WriterStats {
        let queue = self.queue.stats();
        WriterStats {
            submitted: queue.push_count,
            rejected: queue.reject_count,
            queued: queue.current_size,
            persisted: self.persisted.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            backup_failures: self.backup_failures.load(Ordering::Relaxed),
            batches_flushed: self.batches.load(Ordering::Relaxed),
            total_flush_time_ms: self.total_flush_time_ms.load(Ordering::Relaxed),
        }
    }
}

/// Writer statistics
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    pub submitted: u64,
    pub rejected: u64,
    pub queued: usize,
    pub persisted: u64,
    pub store_failures: u64,
    pub backup_failures: u64,
    pub batches_flushed: u64,
    pub total_flush_time_ms: u64,
}

impl WriterStats {
    /// Records that did not reach the store or the backup ring
    pub fn persist_failures(&self) -> u64 {
        self.rejected + self.store_failures + self.backup_failures
    }

    pub fn avg_flush_time_ms(&self) -> u64 {
        if self.batches_flushed == 0 {
            0
        } else {
            self.total_flush_time_ms / self.batches_flushed
        }
    }
}
