// packages/engine/src/lib.rs
//! Netscope Engine Library
//!
//! Reconstructs complete network request records from the three
//! independently delivered lifecycle events of each exchange, persists
//! them, and renders exports.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **interception**: Phase events, domain filter, in-flight store, correlator
//! - **recording**: Record store, backup ring, background writer, exports
//! - **monitor**: Control surface tying the components together
//! - **api**: HTTP transport for events and control
//! - **observability**: Metrics, tracing, and logging
//! - **utils**: Configuration, errors, file helpers

// Public module exports
pub mod api;
pub mod interception;
pub mod monitor;
pub mod observability;
pub mod recording;
pub mod utils;

// Re-export commonly used types
pub use interception::correlator::{Correlator, MonitorState, PhaseOutcome};
pub use monitor::{DebugSnapshot, FinalizeOutcome, Monitor};
pub use recording::exporter::{ExportArtifact, ExportFormat};
pub use recording::record::RequestRecord;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
