// packages/engine/src/recording/mod.rs
//! Record persistence and export
//!
//! This module owns everything that happens after a request is finalized:
//!
//! - **Record**: The flat request record and its column layout
//! - **Record Queue**: Lock-free MPMC queue between finalize and persistence
//! - **Writer**: Background batch writer feeding the store and backup ring
//! - **Storage**: SQLite-backed append-only record store
//! - **Backup Ring**: Bounded JSON mirror of the most recent records
//! - **Summary**: Aggregate counts over a record set
//! - **Exporter**: Export to JSON, CSV, SQL script and text archive
//!
//! # Architecture
//!
//! ```text
//! Correlator → on_phase3() → Record Queue → Background Writer
//!                                                 ↓
//!                                      RecordStore (ids assigned)
//!                                                 ↓
//!                                             BackupRing
//!
//! Export: RecordStore.get_all() ─(on failure)→ BackupRing.records()
//!                    ↓
//!                 Exporter
//! ```

pub mod backup_ring;
pub mod exporter;
pub mod record;
pub mod record_queue;
pub mod storage;
pub mod summary;
pub mod writer;

// Re-export commonly used types
pub use backup_ring::BackupRing;
pub use exporter::{ExportArtifact, ExportFormat, Exporter};
pub use record::RequestRecord;
pub use record_queue::{QueueStats, RecordQueue};
pub use storage::RecordStore;
pub use summary::Summary;
pub use writer::{RecordWriter, WriterStats};
