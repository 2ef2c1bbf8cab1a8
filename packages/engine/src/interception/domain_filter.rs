// packages/engine/src/interception/domain_filter.rs
//! Domain exclusion gate
//!
//! Holds the set of host names whose traffic is not captured. The set is
//! consulted on every phase-1 event, so lookups take a read lock only;
//! mutations are persisted to a JSON file before they return.

use crate::utils::errors::Result;
use crate::utils::fs::{read_json, write_json_atomic};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Set of excluded domains
pub struct DomainFilter {
    /// Lowercase excluded host names
    domains: RwLock<BTreeSet<String>>,

    /// Backing file, `None` for an in-memory filter
    path: Option<PathBuf>,

    /// Serializes snapshot-and-write so an older set never overwrites a newer one
    persist_lock: Mutex<()>,
}

impl DomainFilter {
    /// Create an empty, non-persistent filter
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(BTreeSet::new()),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Load the filter from `path`, starting empty if the file does not exist
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stored: Vec<String> = read_json(&path).await?.unwrap_or_default();
        let domains: BTreeSet<String> = stored.iter().map(|d| normalize(d)).collect();

        info!("Loaded {} disabled domains from {:?}", domains.len(), path);

        Ok(Self {
            domains: RwLock::new(domains),
            path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    /// Whether traffic for `domain` is excluded (exact match, no wildcards)
    pub fn is_excluded(&self, domain: &str) -> bool {
        let domains = self.domains.read();
        if domains.is_empty() {
            return false;
        }
        if domain.bytes().any(|b| b.is_ascii_uppercase()) {
            domains.contains(&domain.to_ascii_lowercase())
        } else {
            domains.contains(domain)
        }
    }

    /// Exclude a domain (idempotent)
    pub async fn disable(&self, domain: &str) -> Result<()> {
        let domain = normalize(domain);
        let _guard = self.persist_lock.lock().await;

        let inserted = self.domains.write().insert(domain.clone());
        if inserted {
            info!("Disabled capture for {}", domain);
        } else {
            debug!("Domain {} already disabled", domain);
        }

        self.persist().await
    }

    /// Re-include a domain (idempotent)
    pub async fn enable(&self, domain: &str) -> Result<()> {
        let domain = normalize(domain);
        let _guard = self.persist_lock.lock().await;

        if self.domains.write().remove(&domain) {
            info!("Enabled capture for {}", domain);
        } else {
            debug!("Domain {} was not disabled", domain);
        }

        self.persist().await
    }

    /// Currently excluded domains in sorted order
    pub fn list(&self) -> Vec<String> {
        self.domains.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.domains.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.read().is_empty()
    }

    /// Write the current set; callers hold `persist_lock`
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.list();
        write_json_atomic(path, &snapshot).await
    }
}

impl Default for DomainFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Trimmed lowercase form; a bare IPv6 literal gets the brackets URLs carry
fn normalize(domain: &str) -> String {
    let domain = domain.trim().to_ascii_lowercase();
    if domain.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]", domain)
    } else {
        domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::request_url::RequestUrl;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disable_enable() {
        let filter = DomainFilter::new();

        filter.disable("example.com").await.unwrap();
        assert!(filter.is_excluded("example.com"));

        filter.enable("example.com").await.unwrap();
        assert!(!filter.is_excluded("example.com"));
    }

    #[tokio::test]
    async fn test_idempotent_mutations() {
        let filter = DomainFilter::new();

        filter.disable("example.com").await.unwrap();
        filter.disable("example.com").await.unwrap();
        assert_eq!(filter.len(), 1);

        filter.enable("other.com").await.unwrap();
        filter.enable("example.com").await.unwrap();
        filter.enable("example.com").await.unwrap();
        assert!(filter.is_empty());
    }

    #[tokio::test]
    async fn test_exact_match_only() {
        let filter = DomainFilter::new();
        filter.disable("Example.COM ").await.unwrap();

        assert!(filter.is_excluded("example.com"));
        assert!(filter.is_excluded("EXAMPLE.com"));
        assert!(!filter.is_excluded("cdn.example.com"));
        assert!(!filter.is_excluded("example.com.evil"));
    }

    #[tokio::test]
    async fn test_ipv6_literal_matches_parsed_host() {
        let filter = DomainFilter::new();
        filter.disable("[::1]").await.unwrap();
        filter.disable("FE80::1").await.unwrap();

        let loopback = RequestUrl::parse("http://[::1]:8080/health");
        let link_local = RequestUrl::parse("http://[fe80::1]/");
        assert!(filter.is_excluded(&loopback.domain));
        assert!(filter.is_excluded(&link_local.domain));
        assert_eq!(filter.list(), vec!["[::1]".to_string(), "[fe80::1]".to_string()]);

        filter.enable("::1").await.unwrap();
        assert!(!filter.is_excluded(&loopback.domain));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let filter = DomainFilter::new();
        filter.disable("b.test").await.unwrap();
        filter.disable("a.test").await.unwrap();

        assert_eq!(filter.list(), vec!["a.test".to_string(), "b.test".to_string()]);
    }

    #[tokio::test]
    async fn test_persisted_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disabled_domains.json");

        {
            let filter = DomainFilter::load(&path).await.unwrap();
            filter.disable("tracker.test").await.unwrap();
            filter.disable("ads.test").await.unwrap();
            filter.enable("ads.test").await.unwrap();
        }

        let reloaded = DomainFilter::load(&path).await.unwrap();
        assert_eq!(reloaded.list(), vec!["tracker.test".to_string()]);
    }
}
