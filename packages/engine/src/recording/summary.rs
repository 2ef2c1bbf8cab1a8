// packages/engine/src/recording/summary.rs
//! Aggregate view over a record set
//!
//! Always computed fresh from the records passed in; nothing is cached.

use crate::recording::record::RequestRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Bucket used when a categorical field is absent or empty
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Request counts grouped by category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_requests: usize,
    pub by_method: BTreeMap<String, u64>,
    pub by_response_code: BTreeMap<String, u64>,
    pub by_content_type: BTreeMap<String, u64>,
    pub by_protocol: BTreeMap<String, u64>,
    pub unique_domains: usize,
    pub total_content_length: u64,
}

impl Summary {
    /// Summarize `records` in one pass
    pub fn from_records(records: &[RequestRecord]) -> Self {
        let mut summary = Summary {
            total_requests: records.len(),
            ..Default::default()
        };
        let mut domains: HashSet<&str> = HashSet::new();

        for record in records {
            bump(&mut summary.by_method, &record.method);
            bump(
                &mut summary.by_response_code,
                &record
                    .response_code
                    .map(|code| code.to_string())
                    .unwrap_or_default(),
            );
            bump(
                &mut summary.by_content_type,
                major_content_type(record.content_type.as_deref().unwrap_or("")),
            );
            bump(&mut summary.by_protocol, record.protocol.as_deref().unwrap_or(""));

            if let Some(domain) = record.domain.as_deref().filter(|d| !d.is_empty()) {
                domains.insert(domain);
            }
            if let Some(len) = record.content_length {
                summary.total_content_length = summary.total_content_length.saturating_add(len);
            }
        }

        summary.unique_domains = domains.len();
        summary
    }
}

/// `text/html; charset=utf-8` → `text/html`
pub fn major_content_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

fn bump(counts: &mut BTreeMap<String, u64>, key: &str) {
    let key = if key.is_empty() { UNKNOWN_BUCKET } else { key };
    *counts.entry(key.to_string()).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(method: &str, domain: &str, code: Option<u16>, ct: Option<&str>, len: Option<u64>) -> RequestRecord {
        let mut record = RequestRecord::pending(method, format!("https://{}/", domain), Utc::now());
        record.protocol = Some("https".to_string());
        record.domain = Some(domain.to_string());
        record.response_code = code;
        record.content_type = ct.map(str::to_string);
        record.content_length = len;
        record
    }

    #[test]
    fn test_empty_summary() {
        let summary = Summary::from_records(&[]);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.unique_domains, 0);
        assert!(summary.by_method.is_empty());
    }

    #[test]
    fn test_grouping() {
        let records = vec![
            record("GET", "a.test", Some(200), Some("text/html; charset=utf-8"), Some(100)),
            record("GET", "a.test", Some(404), Some("text/html"), Some(20)),
            record("POST", "b.test", Some(200), Some("application/json"), None),
            record("GET", "c.test", None, None, None),
        ];

        let summary = Summary::from_records(&records);

        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.by_method["GET"], 3);
        assert_eq!(summary.by_method["POST"], 1);
        assert_eq!(summary.by_response_code["200"], 2);
        assert_eq!(summary.by_response_code["404"], 1);
        assert_eq!(summary.by_response_code[UNKNOWN_BUCKET], 1);
        assert_eq!(summary.by_content_type["text/html"], 2);
        assert_eq!(summary.by_content_type[UNKNOWN_BUCKET], 1);
        assert_eq!(summary.by_protocol["https"], 4);
        assert_eq!(summary.unique_domains, 3);
        assert_eq!(summary.total_content_length, 120);
    }

    #[test]
    fn test_major_content_type() {
        assert_eq!(major_content_type("text/css;charset=UTF-8"), "text/css");
        assert_eq!(major_content_type(" image/png "), "image/png");
        assert_eq!(major_content_type(""), "");
    }
}
