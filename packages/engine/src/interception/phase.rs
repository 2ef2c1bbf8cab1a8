// packages/engine/src/interception/phase.rs
//! Lifecycle events delivered by the interception layer
//!
//! Every observed exchange produces up to three events sharing one
//! correlation key: request initiated, response headers received, and
//! request completed.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single HTTP header as delivered by the host platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Case-insensitive header lookup; an absent header resolves to `""`
pub fn header_value<'a>(headers: &'a [Header], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or("")
}

/// Serialize an ordered header list for storage
pub fn serialize_headers(headers: &[Header]) -> String {
    serde_json::to_string(headers).unwrap_or_else(|_| "[]".to_string())
}

/// Phase 1: the request was initiated
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInitiated {
    pub method: String,
    pub url: String,
    #[serde(default, alias = "requestHeadersRaw")]
    pub request_headers: Vec<Header>,
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub window_id: Option<i64>,
}

impl RequestInitiated {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            request_headers: Vec::new(),
            tab_id: None,
            frame_id: None,
            window_id: None,
        }
    }
}

/// Phase 2: response headers arrived
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadersReceived {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub status_line: String,
    #[serde(default, alias = "responseHeadersRaw")]
    pub response_headers: Vec<Header>,
}

/// Response body as obtained by the body collaborator
#[derive(Debug, Clone)]
pub enum BodySample {
    /// Full body bytes
    Captured(Bytes),

    /// The collaborator could not supply a body (reason kept for logging)
    Unavailable(String),
}

/// Phase 3: the request completed
#[derive(Debug, Clone, Default)]
pub struct RequestCompleted {
    pub request_headers: Vec<Header>,
    pub body: Option<BodySample>,
}

impl RequestCompleted {
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(BodySample::Captured(body.into()));
        self
    }
}
