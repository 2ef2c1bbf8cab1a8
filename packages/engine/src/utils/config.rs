// packages/engine/src/utils/config.rs
//! Layered engine configuration
//!
//! Defaults are compiled in; an optional TOML file (path taken from
//! `NETSCOPE_CONFIG`, default `netscope.toml`) overrides them, and
//! `NETSCOPE__<SECTION>__<KEY>` environment variables override both.

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "NETSCOPE_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "netscope.toml";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageSettings,
    pub correlator: CorrelatorSettings,
    pub writer: WriterSettings,
    pub server: ServerSettings,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// `[storage]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding the database and JSON state files
    pub data_dir: PathBuf,

    /// SQLite database file name
    pub db_name: String,

    /// Backup ring file name
    pub backup_file: String,

    /// Disabled-domain set file name
    pub domains_file: String,

    /// Number of records mirrored by the backup ring
    pub backup_capacity: usize,

    /// Minimum time between backup ring file rewrites; 0 rewrites on every batch
    pub backup_persist_interval_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./netscope-data"),
            db_name: "requests.db".to_string(),
            backup_file: "backup_ring.json".to_string(),
            domains_file: "disabled_domains.json".to_string(),
            backup_capacity: 1000,
            backup_persist_interval_ms: 1000,
        }
    }
}

impl StorageSettings {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_name)
    }

    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(&self.backup_file)
    }

    pub fn domains_path(&self) -> PathBuf {
        self.data_dir.join(&self.domains_file)
    }

    pub fn backup_persist_interval(&self) -> Duration {
        Duration::from_millis(self.backup_persist_interval_ms)
    }
}

/// `[correlator]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelatorSettings {
    /// Pending entries older than this are reclaimed
    pub pending_ttl_secs: u64,

    /// How often the orphan sweep runs
    pub sweep_interval_secs: u64,

    /// Whether the monitoring gate starts open
    pub start_monitoring: bool,
}

impl Default for CorrelatorSettings {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 300,
            sweep_interval_secs: 30,
            start_monitoring: true,
        }
    }
}

impl CorrelatorSettings {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// `[writer]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// Finalized records buffered ahead of the store
    pub queue_capacity: usize,

    /// Records written per transaction
    pub batch_size: usize,

    /// Periodic drain interval (milliseconds)
    pub flush_interval_ms: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            flush_interval_ms: 100,
        }
    }
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7878,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| EngineError::ConfigError(format!("Invalid server address: {}", e)))
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// `[metrics]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9187".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = Config::builder()
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("NETSCOPE").separator("__"))
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Parse configuration from a TOML string (no environment overlay)
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        engine_config.validate()?;
        Ok(engine_config)
    }

    /// Reject values that would stall the engine
    pub fn validate(&self) -> Result<()> {
        if self.storage.backup_capacity == 0 {
            return Err(EngineError::ConfigError(
                "storage.backup_capacity must be greater than zero".to_string(),
            ));
        }
        if self.writer.queue_capacity == 0 || self.writer.batch_size == 0 {
            return Err(EngineError::ConfigError(
                "writer.queue_capacity and writer.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.writer.flush_interval_ms == 0 || self.correlator.sweep_interval_secs == 0 {
            return Err(EngineError::ConfigError(
                "flush and sweep intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.storage.backup_capacity, 1000);
        assert_eq!(config.storage.backup_persist_interval(), Duration::from_secs(1));
        assert_eq!(config.correlator.pending_ttl_secs, 300);
        assert!(config.correlator.start_monitoring);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [storage]
            data_dir = "/tmp/netscope"
            backup_capacity = 50

            [logging]
            format = "pretty"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/netscope"));
        assert_eq!(config.storage.backup_capacity, 50);
        assert_eq!(config.storage.db_name, "requests.db");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.server.port, 7878);
        assert_eq!(
            config.storage.db_path(),
            PathBuf::from("/tmp/netscope/requests.db")
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = EngineConfig::from_toml_str("[storage]\nbackup_capacity = 0\n");
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[test]
    fn test_server_addr() {
        let settings = ServerSettings::default();
        assert_eq!(settings.socket_addr().unwrap().port(), 7878);

        let bad = ServerSettings {
            host: "not a host".to_string(),
            port: 1,
        };
        assert!(bad.socket_addr().is_err());
    }
}
