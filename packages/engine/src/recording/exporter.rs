// packages/engine/src/recording/exporter.rs
//! Export captured records to various formats
//!
//! Supports:
//! - JSON (pretty-printed array, record field order)
//! - CSV (every cell quoted, absent values empty)
//! - SQL script (a text script of `CREATE TABLE` + `INSERT`s; not a database file)
//! - Text archive (JSON, CSV and summary bundled in one document)

use crate::observability::EXPORTS_RENDERED;
use crate::recording::record::{ColumnKind, RequestRecord, SqlValue, COLUMNS};
use crate::recording::storage::{column_list, create_table_sql, TABLE};
use crate::recording::summary::Summary;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use std::fmt::Write as _;
use tracing::debug;
use ulid::Ulid;

/// Fixed first lines of every SQL script export
pub const SQL_SCRIPT_HEADER: &str = "-- Netscope network request export\n\
-- Text SQL script; replay it into a database engine, it is not a database file\n\n";

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON array
    Json,

    /// Comma-separated values
    Csv,

    /// SQL text script
    SqlScript,

    /// Composite text archive
    Archive,
}

impl ExportFormat {
    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::SqlScript => "sql",
            ExportFormat::Archive => "archive",
        }
    }

    pub fn file_prefix(self) -> &'static str {
        match self {
            ExportFormat::Archive => "network_monitor_archive",
            _ => "network_requests",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::SqlScript => "sql",
            ExportFormat::Archive => "txt",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::SqlScript => "application/sql",
            ExportFormat::Archive => "text/plain; charset=utf-8",
        }
    }

    /// `<prefix>_<unixMillis>.<ext>`
    pub fn suggested_filename(self, at: DateTime<Utc>) -> String {
        format!("{}_{}.{}", self.file_prefix(), at.timestamp_millis(), self.extension())
    }
}

/// A rendered export and the file name to save it under
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub filename: String,
    pub content: String,
}

/// Exporter for captured records
pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    /// Create a new exporter
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    /// Export records to string
    pub fn export(&self, records: &[RequestRecord]) -> Result<String> {
        self.export_at(records, Utc::now())
    }

    /// Export records to string, stamping time-dependent output with `at`
    pub fn export_at(&self, records: &[RequestRecord], at: DateTime<Utc>) -> Result<String> {
        debug!("Exporting {} records to {:?} format", records.len(), self.format);

        let rendered = match self.format {
            ExportFormat::Json => to_json(records),
            ExportFormat::Csv => to_csv(records),
            ExportFormat::SqlScript => Ok(to_sql_script(records)),
            ExportFormat::Archive => to_text_archive(records, at),
        }?;

        counter!(EXPORTS_RENDERED, "format" => self.format.name()).increment(1);
        Ok(rendered)
    }

    /// Render and name an export
    pub fn artifact(&self, records: &[RequestRecord]) -> Result<ExportArtifact> {
        let at = Utc::now();
        Ok(ExportArtifact {
            format: self.format,
            filename: self.format.suggested_filename(at),
            content: self.export_at(records, at)?,
        })
    }
}

/// Pretty-printed JSON array
pub fn to_json(records: &[RequestRecord]) -> Result<String> {
    serde_json::to_string_pretty(records)
        .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))
}

/// CSV with a header row taken from the first record's field names
pub fn to_csv(records: &[RequestRecord]) -> Result<String> {
    let values = records
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| EngineError::ExportFailed(format!("CSV serialization error: {}", e)))?;

    csv_from_values(&values)
}

/// CSV from JSON objects, e.g. records parsed back from a JSON export
pub fn csv_from_values(rows: &[Value]) -> Result<String> {
    let Some(first) = rows.first() else {
        return Ok(String::new());
    };
    let header: Vec<&str> = as_object(first)?.keys().map(String::as_str).collect();

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&header).map_err(csv_error)?;

    for row in rows {
        let object = as_object(row)?;
        writer
            .write_record(header.iter().map(|name| cell(object.get(*name))))
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| EngineError::ExportFailed(format!("CSV flush error: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| EngineError::ExportFailed(format!("CSV encoding error: {}", e)))
}

fn csv_error(e: csv::Error) -> EngineError {
    EngineError::ExportFailed(format!("CSV write error: {}", e))
}

fn as_object(value: &Value) -> Result<&serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| EngineError::ExportFailed("CSV rows must be JSON objects".to_string()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// SQL text script: fixed header, `CREATE TABLE`, one `INSERT` per record
pub fn to_sql_script(records: &[RequestRecord]) -> String {
    let mut script = String::from(SQL_SCRIPT_HEADER);
    script.push_str(&create_table_sql());
    script.push_str("\n\n");

    let columns = column_list();
    for record in records {
        let values: Vec<String> = record
            .column_values()
            .into_iter()
            .zip(COLUMNS.iter())
            .map(|(value, column)| sql_literal(value, column.kind))
            .collect();

        let _ = writeln!(
            script,
            "INSERT INTO {} ({}) VALUES ({});",
            TABLE,
            columns,
            values.join(", ")
        );
    }

    script
}

fn sql_literal(value: SqlValue<'_>, kind: ColumnKind) -> String {
    match (value, kind) {
        (SqlValue::Integer(n), _) => n.to_string(),
        (SqlValue::Text(s), _) => format!("'{}'", s.replace('\'', "''")),
        (SqlValue::Null, ColumnKind::Integer) => "NULL".to_string(),
        (SqlValue::Null, ColumnKind::Text) => "''".to_string(),
    }
}

/// Single-document archive: header, JSON, CSV and summary sections
pub fn to_text_archive(records: &[RequestRecord], generated_at: DateTime<Utc>) -> Result<String> {
    let json = to_json(records)?;
    let csv = to_csv(records)?;
    let summary = serde_json::to_string_pretty(&Summary::from_records(records))
        .map_err(|e| EngineError::ExportFailed(format!("Summary serialization error: {}", e)))?;

    let mut archive = String::new();
    let _ = writeln!(archive, "==== NETSCOPE ARCHIVE ====");
    let _ = writeln!(archive, "Archive-Id: {}", Ulid::new());
    let _ = writeln!(archive, "Generated: {}", generated_at.to_rfc3339());
    let _ = writeln!(archive, "Records: {}", records.len());

    for (name, body) in [
        ("requests.json", json.as_str()),
        ("requests.csv", csv.as_str()),
        ("summary.json", summary.as_str()),
    ] {
        let _ = writeln!(archive, "\n==== BEGIN {} ====", name);
        archive.push_str(body);
        if !body.ends_with('\n') {
            archive.push('\n');
        }
        let _ = writeln!(archive, "==== END {} ====", name);
    }

    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn create_test_record(url: &str) -> RequestRecord {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut record = RequestRecord::pending("GET", url, ts);
        record.id = Some(1);
        record.protocol = Some("https".to_string());
        record.port = Some(443);
        record.domain = Some("example.com".to_string());
        record.filename = Some("a.js".to_string());
        record.response_code = Some(200);
        record.content_type = Some("application/javascript".to_string());
        record.content_length = Some(42);
        record.user_agent = Some("Agent \"quoted\", with comma".to_string());
        record
    }

    #[test]
    fn test_json_export() {
        let exporter = Exporter::new(ExportFormat::Json);
        let records = vec![create_test_record("https://example.com/a.js")];

        let json = exporter.export(&records).unwrap();
        assert!(json.starts_with("[\n"));
        assert!(json.contains("\"responseCode\": 200"));

        let method_at = json.find("\"method\"").unwrap();
        let url_at = json.find("\"url\"").unwrap();
        let ts_at = json.find("\"timestamp\"").unwrap();
        assert!(method_at < url_at && url_at < ts_at);
    }

    #[test]
    fn test_csv_export() {
        let records = vec![create_test_record("https://example.com/a.js")];
        let csv = to_csv(&records).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"id\",\"method\",\"protocol\",\"port\",\"url\""));
        assert!(lines[1].starts_with("\"1\",\"GET\",\"https\",\"443\""));
        assert!(lines[1].contains("\"Agent \"\"quoted\"\", with comma\""));
        // Absent referer renders as an empty quoted cell.
        assert!(lines[1].contains(",\"\","));
    }

    #[test]
    fn test_csv_empty() {
        assert_eq!(to_csv(&[]).unwrap(), "");
    }

    #[test]
    fn test_csv_survives_json_roundtrip() {
        let mut second = create_test_record("https://example.com/b.css");
        second.id = Some(2);
        second.content_length = None;
        let records = vec![create_test_record("https://example.com/a.js"), second];

        let parsed: Vec<Value> = serde_json::from_str(&to_json(&records).unwrap()).unwrap();
        assert_eq!(csv_from_values(&parsed).unwrap(), to_csv(&records).unwrap());
    }

    #[test]
    fn test_csv_cells_read_back() {
        let mut record = create_test_record("https://example.com/a.js?q=1,2");
        record.referer = Some("line one\nline \"two\"".to_string());
        let csv = to_csv(&[record]).unwrap();

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let headers = reader.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);

        let field = |name: &str| {
            let at = headers.iter().position(|h| h == name).unwrap();
            rows[0].get(at).unwrap().to_string()
        };
        assert_eq!(field("url"), "https://example.com/a.js?q=1,2");
        assert_eq!(field("referer"), "line one\nline \"two\"");
        assert_eq!(field("userAgent"), "Agent \"quoted\", with comma");
    }

    #[test]
    fn test_csv_rejects_non_objects() {
        let result = csv_from_values(&[Value::from(1)]);
        assert!(matches!(result, Err(EngineError::ExportFailed(_))));
    }

    #[test]
    fn test_sql_script_empty() {
        let script = to_sql_script(&[]);

        assert!(script.starts_with(SQL_SCRIPT_HEADER));
        assert!(script.contains("CREATE TABLE IF NOT EXISTS requests"));
        assert_eq!(script.matches("INSERT INTO").count(), 0);
    }

    #[test]
    fn test_sql_script_literals() {
        let mut record = create_test_record("https://example.com/it's.js");
        record.tab_id = None;
        let script = to_sql_script(&[record]);

        assert_eq!(script.matches("INSERT INTO requests").count(), 1);
        assert!(script.contains("'https://example.com/it''s.js'"));
        assert!(script.contains(", 443, "));
        // Absent numeric → NULL, absent text → ''
        assert!(script.contains("NULL"));
        assert!(script.contains(", '', "));
    }

    #[test]
    fn test_sql_script_replays_into_sqlite() {
        let mut second = create_test_record("https://example.com/b");
        second.id = None;
        let script = to_sql_script(&[create_test_record("https://example.com/a"), second]);

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&script).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM requests", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let code: i64 = conn
            .query_row("SELECT response_code FROM requests WHERE id = 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(code, 200);
    }

    #[test]
    fn test_archive_sections() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let records = vec![create_test_record("https://example.com/a.js")];

        let archive = to_text_archive(&records, at).unwrap();

        assert!(archive.starts_with("==== NETSCOPE ARCHIVE ===="));
        assert!(archive.contains("Generated: 2024-05-01T12:00:00+00:00"));
        assert!(archive.contains("Records: 1"));
        for section in ["requests.json", "requests.csv", "summary.json"] {
            assert!(archive.contains(&format!("==== BEGIN {} ====", section)));
            assert!(archive.contains(&format!("==== END {} ====", section)));
        }
        assert!(archive.contains("\"byMethod\""));
        let json_at = archive.find("BEGIN requests.json").unwrap();
        let csv_at = archive.find("BEGIN requests.csv").unwrap();
        let summary_at = archive.find("BEGIN summary.json").unwrap();
        assert!(json_at < csv_at && csv_at < summary_at);
    }

    #[test]
    fn test_suggested_filename() {
        let at = Utc.timestamp_millis_opt(1_714_564_800_123).unwrap();

        assert_eq!(
            ExportFormat::Json.suggested_filename(at),
            "network_requests_1714564800123.json"
        );
        assert_eq!(
            ExportFormat::SqlScript.suggested_filename(at),
            "network_requests_1714564800123.sql"
        );
        assert_eq!(
            ExportFormat::Archive.suggested_filename(at),
            "network_monitor_archive_1714564800123.txt"
        );
    }

    #[test]
    fn test_artifact_names_match_format() {
        let artifact = Exporter::new(ExportFormat::Csv).artifact(&[]).unwrap();
        assert!(artifact.filename.starts_with("network_requests_"));
        assert!(artifact.filename.ends_with(".csv"));
        assert_eq!(artifact.content, "");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn csv_roundtrip_through_json(
                urls in prop::collection::vec("https://[a-z]{1,8}\\.test/[a-z\"',]{0,8}", 1..8),
                codes in prop::collection::vec(prop::option::of(100u16..600), 8),
            ) {
                let records: Vec<RequestRecord> = urls
                    .iter()
                    .zip(codes.iter())
                    .map(|(url, code)| {
                        let mut record = create_test_record(url);
                        record.response_code = *code;
                        record
                    })
                    .collect();

                let parsed: Vec<Value> = serde_json::from_str(&to_json(&records).unwrap()).unwrap();
                prop_assert_eq!(csv_from_values(&parsed).unwrap(), to_csv(&records).unwrap());
            }
        }
    }
}
