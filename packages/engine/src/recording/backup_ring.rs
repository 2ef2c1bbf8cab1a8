// packages/engine/src/recording/backup_ring.rs
//! Bounded mirror of the most recent finalized records
//!
//! Kept in a JSON file separate from the SQLite store so that it survives
//! independently of it. Exports fall back to it when the store cannot be read.
//!
//! The file is rewritten whole, so writes are throttled to one per persist
//! interval; `sync` forces out anything newer on flush and shutdown.

use crate::recording::record::RequestRecord;
use crate::utils::errors::Result;
use crate::utils::fs::{read_json, write_json_atomic};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default number of records mirrored
pub const DEFAULT_CAPACITY: usize = 1000;

/// FIFO ring of finalized records
pub struct BackupRing {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
    path: Option<PathBuf>,
    /// Minimum time between file rewrites; zero writes on every push
    persist_interval: Duration,
    /// Set when the ring holds records the file does not
    dirty: AtomicBool,
    last_persist: Mutex<Option<Instant>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl BackupRing {
    /// In-memory ring
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            path: None,
            persist_interval: Duration::ZERO,
            dirty: AtomicBool::new(false),
            last_persist: Mutex::new(None),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Ring backed by `path`, reloaded if the file exists
    pub async fn load(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let stored: Vec<RequestRecord> = read_json(&path).await?.unwrap_or_default();

        let ring = Self {
            path: Some(path),
            ..Self::new(capacity)
        };
        {
            let mut records = ring.records.lock();
            records.extend(stored);
            trim(&mut records, ring.capacity);
            info!("Backup ring loaded with {} records", records.len());
        }

        Ok(ring)
    }

    /// Rewrite the file at most once per `interval`
    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    /// Append one record, evicting from the front beyond capacity
    pub async fn push(&self, record: RequestRecord) -> Result<()> {
        self.push_batch(vec![record]).await
    }

    /// Append records in order, evicting from the front beyond capacity
    ///
    /// The file is rewritten if the persist interval has elapsed.
    pub async fn push_batch(&self, batch: Vec<RequestRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let evicted = {
            let mut records = self.records.lock();
            records.extend(batch);
            trim(&mut records, self.capacity)
        };
        self.dirty.store(true, Ordering::Release);
        if evicted > 0 {
            debug!("Backup ring evicted {} oldest records", evicted);
        }

        self.persist_if_due().await
    }

    /// Write pending records if the persist interval has elapsed
    pub async fn persist_if_due(&self) -> Result<()> {
        if !self.has_unsaved() {
            return Ok(());
        }
        let last = *self.last_persist.lock();
        let due = last.map_or(true, |at| at.elapsed() >= self.persist_interval);
        if !due {
            return Ok(());
        }
        self.sync().await
    }

    /// Write pending records now
    pub async fn sync(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = self.records();
        let written = write_json_atomic(path, &snapshot).await;
        match &written {
            Ok(()) => *self.last_persist.lock() = Some(Instant::now()),
            Err(_) => self.dirty.store(true, Ordering::Release),
        }
        written
    }

    /// Whether the ring holds records not yet written to its file
    pub fn has_unsaved(&self) -> bool {
        self.path.is_some() && self.dirty.load(Ordering::Acquire)
    }

    /// Snapshot of the mirrored records, oldest first
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn trim(records: &mut VecDeque<RequestRecord>, capacity: usize) -> usize {
    let excess = records.len().saturating_sub(capacity);
    records.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn record(i: usize) -> RequestRecord {
        let mut record = RequestRecord::pending("GET", format!("https://a.test/{}", i), Utc::now());
        record.id = Some(i as i64);
        record
    }

    #[tokio::test]
    async fn test_evicts_oldest_beyond_capacity() {
        let ring = BackupRing::new(DEFAULT_CAPACITY);

        let batch: Vec<_> = (0..1000).map(record).collect();
        ring.push_batch(batch).await.unwrap();
        assert_eq!(ring.len(), 1000);

        ring.push(record(1000)).await.unwrap();
        assert_eq!(ring.len(), 1000);

        let records = ring.records();
        assert_eq!(records.first().unwrap().id, Some(1));
        assert_eq!(records.last().unwrap().id, Some(1000));
    }

    #[tokio::test]
    async fn test_oversized_batch_keeps_newest() {
        let ring = BackupRing::new(3);
        ring.push_batch((0..10).map(record).collect()).await.unwrap();

        let ids: Vec<_> = ring.records().into_iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn test_persisted_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_ring.json");

        {
            let ring = BackupRing::load(&path, 5).await.unwrap();
            ring.push_batch((0..7).map(record).collect()).await.unwrap();
        }

        let reloaded = BackupRing::load(&path, 5).await.unwrap();
        assert_eq!(reloaded.len(), 5);
        assert_eq!(reloaded.records()[0].id, Some(2));

        // A smaller capacity on reload trims from the front.
        let shrunk = BackupRing::load(&path, 2).await.unwrap();
        let ids: Vec<_> = shrunk.records().into_iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_writes_throttled_until_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backup_ring.json");

        let ring = BackupRing::load(&path, 10)
            .await
            .unwrap()
            .with_persist_interval(Duration::from_secs(3600));
        ring.push(record(0)).await.unwrap();
        assert!(!ring.has_unsaved());

        ring.push_batch((1..4).map(record).collect()).await.unwrap();
        ring.persist_if_due().await.unwrap();
        assert!(ring.has_unsaved());
        assert_eq!(BackupRing::load(&path, 10).await.unwrap().len(), 1);

        ring.sync().await.unwrap();
        assert!(!ring.has_unsaved());
        let reloaded = BackupRing::load(&path, 10).await.unwrap();
        let ids: Vec<_> = reloaded.records().into_iter().map(|r| r.id.unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_in_memory_ring_has_nothing_unsaved() {
        let ring = BackupRing::new(3).with_persist_interval(Duration::from_secs(3600));
        ring.push(record(0)).await.unwrap();
        assert!(!ring.has_unsaved());
        ring.sync().await.unwrap();
    }
}
