// packages/engine/src/monitor.rs
//! Monitor: the control surface over correlation, persistence and export
//!
//! Owns one instance of every component and wires them together. The HTTP
//! layer and the daemon talk to this type only.

use crate::interception::correlator::{Correlator, CorrelatorStats, MonitorState, PhaseOutcome};
use crate::interception::domain_filter::DomainFilter;
use crate::interception::phase::{HeadersReceived, RequestCompleted, RequestInitiated};
use crate::recording::backup_ring::BackupRing;
use crate::recording::exporter::{ExportArtifact, ExportFormat, Exporter};
use crate::recording::record::RequestRecord;
use crate::recording::storage::RecordStore;
use crate::recording::writer::{RecordWriter, WriterStats};
use crate::utils::config::EngineConfig;
use crate::utils::errors::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A finalized record and whether it was queued for persistence
///
/// The record is returned even when queueing failed, so nothing is
/// silently dropped; durability is what `queued` reports.
#[derive(Debug)]
pub struct FinalizeOutcome {
    pub record: RequestRecord,
    pub queued: Result<()>,
}

/// Point-in-time view of the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSnapshot {
    pub monitoring: bool,
    pub disabled_domains: Vec<String>,
    pub record_count: u64,
    pub last_timestamp: Option<String>,
    pub in_flight: usize,
    pub queued: usize,
    pub persist_failures: u64,
}

/// Network request monitor
pub struct Monitor {
    config: EngineConfig,
    state: Arc<MonitorState>,
    filter: Arc<DomainFilter>,
    correlator: Arc<Correlator>,
    store: Arc<RecordStore>,
    backup: Arc<BackupRing>,
    writer: Arc<RecordWriter>,
}

impl Monitor {
    /// Open the monitor over the on-disk state in `config.storage.data_dir`
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let storage = &config.storage;
        let store = RecordStore::open(storage.db_path()).await?;
        let backup = BackupRing::load(storage.backup_path(), storage.backup_capacity)
            .await?
            .with_persist_interval(storage.backup_persist_interval());
        let filter = DomainFilter::load(storage.domains_path()).await?;

        info!("Monitor opened over {:?}", storage.data_dir);
        Ok(Self::assemble(config, store, backup, filter))
    }

    /// Monitor with no on-disk state
    pub async fn in_memory(config: EngineConfig) -> Result<Self> {
        let store = RecordStore::in_memory().await?;
        let backup = BackupRing::new(config.storage.backup_capacity);
        Ok(Self::assemble(config, store, backup, DomainFilter::new()))
    }

    fn assemble(config: EngineConfig, store: RecordStore, backup: BackupRing, filter: DomainFilter) -> Self {
        let state = Arc::new(MonitorState::new(config.correlator.start_monitoring));
        let filter = Arc::new(filter);
        let store = Arc::new(store);
        let backup = Arc::new(backup);

        let correlator = Arc::new(Correlator::new(
            Arc::clone(&state),
            Arc::clone(&filter),
            config.correlator.pending_ttl(),
        ));
        let writer = Arc::new(RecordWriter::new(
            config.writer.clone(),
            Arc::clone(&store),
            Arc::clone(&backup),
        ));

        Self {
            config,
            state,
            filter,
            correlator,
            store,
            backup,
            writer,
        }
    }

    /// Spawn the record writer and the orphan sweeper
    pub fn spawn_background(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.writer.spawn(cancel.clone()),
            self.correlator
                .spawn_sweeper(self.config.correlator.sweep_interval(), cancel),
        ]
    }

    /// Open the monitoring gate; returns `true` if it was closed
    pub fn start(&self) -> bool {
        let changed = self.state.start();
        if changed {
            info!("Monitoring started");
        }
        changed
    }

    /// Close the monitoring gate; returns `true` if it was open
    pub fn stop(&self) -> bool {
        let changed = self.state.stop();
        if changed {
            info!("Monitoring stopped");
        }
        changed
    }

    pub fn is_monitoring(&self) -> bool {
        self.state.is_monitoring()
    }

    pub async fn disable_domain(&self, domain: &str) -> Result<()> {
        self.filter.disable(domain).await
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.filter.enable(domain).await
    }

    pub fn list_disabled_domains(&self) -> Vec<String> {
        self.filter.list()
    }

    pub fn on_phase1(&self, key: &str, event: RequestInitiated) -> PhaseOutcome {
        self.correlator.on_phase1(key, event)
    }

    pub fn on_phase2(&self, key: &str, event: HeadersReceived) -> PhaseOutcome {
        self.correlator.on_phase2(key, event)
    }

    /// Finalize `key` and queue the record for persistence
    pub fn on_phase3(&self, key: &str, event: RequestCompleted) -> Option<FinalizeOutcome> {
        let record = self.correlator.on_phase3(key, event)?;
        let queued = self.writer.submit(record.clone());
        Some(FinalizeOutcome { record, queued })
    }

    /// Persist everything finalized so far
    pub async fn flush(&self) -> Result<usize> {
        self.writer.flush().await
    }

    /// All finalized records in insertion order
    pub async fn get_all(&self) -> Result<Vec<RequestRecord>> {
        self.flush_quietly().await;
        self.store.get_all().await
    }

    /// Render an export of every finalized record
    pub async fn export(&self, format: ExportFormat) -> Result<ExportArtifact> {
        let records = self.snapshot().await;
        Exporter::new(format).artifact(&records)
    }

    pub async fn export_json(&self) -> Result<ExportArtifact> {
        self.export(ExportFormat::Json).await
    }

    pub async fn export_csv(&self) -> Result<ExportArtifact> {
        self.export(ExportFormat::Csv).await
    }

    pub async fn export_sql_script(&self) -> Result<ExportArtifact> {
        self.export(ExportFormat::SqlScript).await
    }

    pub async fn export_archive(&self) -> Result<ExportArtifact> {
        self.export(ExportFormat::Archive).await
    }

    pub async fn debug_snapshot(&self) -> DebugSnapshot {
        self.flush_quietly().await;

        let (record_count, last_timestamp) = match self.store_summary().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Record store unavailable for debug snapshot, using backup ring: {}", e);
                let records = self.backup.records();
                (
                    records.len() as u64,
                    records.last().map(|r| r.timestamp.to_rfc3339()),
                )
            }
        };

        DebugSnapshot {
            monitoring: self.state.is_monitoring(),
            disabled_domains: self.filter.list(),
            record_count,
            last_timestamp,
            in_flight: self.correlator.in_flight_len(),
            queued: self.writer.queued(),
            persist_failures: self.writer.stats().persist_failures(),
        }
    }

    pub fn correlator_stats(&self) -> CorrelatorStats {
        self.correlator.stats()
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Flush on the way out; background tasks should already be cancelled
    pub async fn shutdown(&self) -> Result<()> {
        let written = self.flush().await?;
        self.backup.sync().await?;
        info!("Monitor shut down after persisting {} queued records", written);
        Ok(())
    }

    /// Store contents, falling back to the backup ring when the store fails
    async fn snapshot(&self) -> Vec<RequestRecord> {
        self.flush_quietly().await;
        match self.store.get_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Record store unavailable, exporting from backup ring: {}", e);
                self.backup.records()
            }
        }
    }

    async fn store_summary(&self) -> Result<(u64, Option<String>)> {
        Ok((self.store.count().await?, self.store.last_timestamp().await?))
    }

    async fn flush_quietly(&self) {
        if let Err(e) = self.writer.flush().await {
            warn!("Flush before read failed: {}", e);
        }
    }
}
