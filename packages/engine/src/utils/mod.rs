// packages/engine/src/utils/mod.rs
//! Common utilities: errors, configuration, state-file helpers

pub mod config;
pub mod errors;
pub mod fs;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
