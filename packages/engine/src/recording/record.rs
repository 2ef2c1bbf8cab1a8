// packages/engine/src/recording/record.rs
//! The captured request record
//!
//! A `RequestRecord` is created pending at phase 1, only ever gains fields
//! during phases 2 and 3, and is immutable once finalized.

use chrono::{DateTime, Utc};
use rusqlite::types::{Null, ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// One observed network exchange
///
/// Field order is the export order. Absent values serialize as `null` so
/// every record carries the full key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// Store-assigned sequence id; `None` until persisted
    pub id: Option<i64>,
    pub method: String,
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub url: String,
    pub filename: Option<String>,
    pub domain: Option<String>,
    pub tab_id: Option<i64>,
    pub window_id: Option<i64>,
    /// Serialized ordered header list
    pub request_headers: Option<String>,
    /// Serialized ordered header list
    pub response_headers: Option<String>,
    pub response_code: Option<u16>,
    pub response_message: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub server: Option<String>,
    pub date: Option<String>,
    pub location: Option<String>,
    pub vary: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub cookie: Option<String>,
    pub x_forwarded_for: Option<String>,
    /// First characters of the response body
    pub response_preview: Option<String>,
    /// SHA-256 hex digest of the response body
    pub response_checksum: Option<String>,
    /// When the request was first observed
    pub timestamp: DateTime<Utc>,
}

impl RequestRecord {
    /// A record holding only the mandatory fields
    pub fn pending(method: impl Into<String>, url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            method: method.into(),
            protocol: None,
            port: None,
            url: url.into(),
            filename: None,
            domain: None,
            tab_id: None,
            window_id: None,
            request_headers: None,
            response_headers: None,
            response_code: None,
            response_message: None,
            content_type: None,
            content_length: None,
            server: None,
            date: None,
            location: None,
            vary: None,
            user_agent: None,
            referer: None,
            origin: None,
            cookie: None,
            x_forwarded_for: None,
            response_preview: None,
            response_checksum: None,
            timestamp,
        }
    }

    /// Column values in [`COLUMNS`] order
    pub fn column_values(&self) -> Vec<SqlValue<'_>> {
        vec![
            self.id.map_or(SqlValue::Null, SqlValue::Integer),
            SqlValue::Text(Cow::Owned(self.timestamp.to_rfc3339())),
            SqlValue::Text(Cow::Borrowed(&self.method)),
            text(&self.protocol),
            integer(self.port),
            SqlValue::Text(Cow::Borrowed(&self.url)),
            text(&self.filename),
            text(&self.domain),
            text(&self.user_agent),
            text(&self.referer),
            text(&self.origin),
            text(&self.cookie),
            text(&self.vary),
            text(&self.x_forwarded_for),
            text(&self.content_type),
            integer(self.response_code),
            text(&self.response_message),
            text(&self.date),
            text(&self.server),
            self.content_length
                .map_or(SqlValue::Null, |len| SqlValue::Integer(len.min(i64::MAX as u64) as i64)),
            text(&self.location),
            text(&self.response_preview),
            text(&self.response_checksum),
            integer(self.tab_id),
            integer(self.window_id),
            text(&self.request_headers),
            text(&self.response_headers),
        ]
    }
}

/// Fill `slot` only if it is still absent
pub fn fill<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn text(value: &Option<String>) -> SqlValue<'_> {
    match value {
        Some(s) => SqlValue::Text(Cow::Borrowed(s)),
        None => SqlValue::Null,
    }
}

fn integer<T: Into<i64>>(value: Option<T>) -> SqlValue<'static> {
    value.map_or(SqlValue::Null, |v| SqlValue::Integer(v.into()))
}

/// Column affinity in the persisted schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
}

/// A column of the persisted schema
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
}

const fn int(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Integer,
    }
}

const fn txt(name: &'static str) -> Column {
    Column {
        name,
        kind: ColumnKind::Text,
    }
}

/// The `requests` table schema, shared by the record store and the SQL script export
pub const COLUMNS: [Column; 27] = [
    int("id"),
    txt("timestamp"),
    txt("method"),
    txt("protocol"),
    int("port"),
    txt("url"),
    txt("filename"),
    txt("domain"),
    txt("user_agent"),
    txt("referer"),
    txt("origin"),
    txt("cookie"),
    txt("vary"),
    txt("x_forwarded_for"),
    txt("content_type"),
    int("response_code"),
    txt("response_message"),
    txt("date"),
    txt("server"),
    int("content_length"),
    txt("location"),
    txt("response_preview"),
    txt("response_checksum"),
    int("tab_id"),
    int("window_id"),
    txt("request_headers"),
    txt("response_headers"),
];

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue<'a> {
    Integer(i64),
    Text(Cow<'a, str>),
    Null,
}

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Integer(v) => ToSqlOutput::from(*v),
            SqlValue::Text(s) => ToSqlOutput::from(&**s),
            SqlValue::Null => ToSqlOutput::from(Null),
        })
    }
}
