// packages/engine/src/recording/storage.rs
//! Durable record store using SQLite
//!
//! Finalized records are appended to the `requests` table. Ids come from
//! `AUTOINCREMENT`, whose high-water mark SQLite persists in
//! `sqlite_sequence`, so an id is never handed out twice, even across
//! restarts. Records are immutable once stored; there is no update or delete.

use crate::recording::record::{ColumnKind, RequestRecord, COLUMNS};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Table holding finalized records
pub const TABLE: &str = "requests";

/// Durable, append-only record store
pub struct RecordStore {
    path: Option<PathBuf>,
    db: Arc<Mutex<Connection>>,
}

impl RecordStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::StorageFailed(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(&path).map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        let store = Self {
            path: Some(path),
            db: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;

        info!("Record store opened at {:?}", store.path);
        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open database: {}", e))
        })?;

        let store = Self {
            path: None,
            db: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute_batch(&create_table_sql())
            .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))?;

        Ok(())
    }

    /// Append one record; returns its assigned id
    pub async fn insert(&self, record: &RequestRecord) -> Result<i64> {
        let ids = self.insert_batch(std::slice::from_ref(record)).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| EngineError::StorageFailed("Insert returned no id".to_string()))
    }

    /// Append records in one transaction; returns their ids in order
    ///
    /// Any id already set on an incoming record is ignored.
    pub async fn insert_batch(&self, records: &[RequestRecord]) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut ids = Vec::with_capacity(records.len());

        {
            let mut stmt = tx.prepare_cached(&insert_sql())?;
            for record in records {
                // Skip the id column; the store assigns it.
                let values = record.column_values().into_iter().skip(1);
                stmt.execute(params_from_iter(values))?;
                ids.push(tx.last_insert_rowid());
            }
        }

        tx.commit()?;
        debug!("Inserted {} records (last id {:?})", ids.len(), ids.last());

        Ok(ids)
    }

    /// All records in insertion order
    pub async fn get_all(&self) -> Result<Vec<RequestRecord>> {
        let db = self.db.lock().await;

        let mut stmt = db.prepare(&format!("SELECT {} FROM {} ORDER BY id", column_list(), TABLE))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(&format!("SELECT COUNT(*) FROM {}", TABLE), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Timestamp of the most recently inserted record
    pub async fn last_timestamp(&self) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let timestamp = db
            .query_row(
                &format!("SELECT timestamp FROM {} ORDER BY id DESC LIMIT 1", TABLE),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(timestamp)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// `CREATE TABLE` statement for the records table
pub fn create_table_sql() -> String {
    let columns = COLUMNS
        .iter()
        .map(|column| {
            if column.name == "id" {
                "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()
            } else {
                format!("{} {}", column.name, sql_type(column.kind))
            }
        })
        .collect::<Vec<_>>()
        .join(",\n    ");

    format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n);", TABLE, columns)
}

pub(crate) fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "INTEGER",
        ColumnKind::Text => "TEXT",
    }
}

pub(crate) fn column_list() -> String {
    COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

fn insert_sql() -> String {
    let names: Vec<&str> = COLUMNS.iter().skip(1).map(|c| c.name).collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    format!("INSERT INTO {} ({}) VALUES ({})", TABLE, names.join(", "), placeholders)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RequestRecord> {
    let timestamp: String = row.get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e)))?;
    let content_length: Option<i64> = row.get("content_length")?;

    Ok(RequestRecord {
        id: row.get("id")?,
        method: row.get("method")?,
        protocol: row.get("protocol")?,
        port: row.get("port")?,
        url: row.get("url")?,
        filename: row.get("filename")?,
        domain: row.get("domain")?,
        tab_id: row.get("tab_id")?,
        window_id: row.get("window_id")?,
        request_headers: row.get("request_headers")?,
        response_headers: row.get("response_headers")?,
        response_code: row.get("response_code")?,
        response_message: row.get("response_message")?,
        content_type: row.get("content_type")?,
        content_length: content_length.map(|len| len.max(0) as u64),
        server: row.get("server")?,
        date: row.get("date")?,
        location: row.get("location")?,
        vary: row.get("vary")?,
        user_agent: row.get("user_agent")?,
        referer: row.get("referer")?,
        origin: row.get("origin")?,
        cookie: row.get("cookie")?,
        x_forwarded_for: row.get("x_forwarded_for")?,
        response_preview: row.get("response_preview")?,
        response_checksum: row.get("response_checksum")?,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(url: &str) -> RequestRecord {
        let mut record = RequestRecord::pending("GET", url, Utc::now());
        record.protocol = Some("https".to_string());
        record.port = Some(443);
        record.domain = Some("a.test".to_string());
        record.response_code = Some(200);
        record.content_length = Some(512);
        record.user_agent = Some("UA".to_string());
        record
    }

    #[tokio::test]
    async fn test_store_creation() {
        let dir = tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("requests.db")).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_insert_and_get_all() {
        let store = RecordStore::in_memory().await.unwrap();

        let first = store.insert(&record("https://a.test/1")).await.unwrap();
        let second = store.insert(&record("https://a.test/2")).await.unwrap();
        assert!(second > first);

        let records = store.get_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, Some(first));
        assert_eq!(records[0].url, "https://a.test/1");
        assert_eq!(records[1].url, "https://a.test/2");
        assert_eq!(records[0].port, Some(443));
        assert_eq!(records[0].content_length, Some(512));
        assert_eq!(records[0].referer, None);
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_record() {
        let store = RecordStore::in_memory().await.unwrap();
        let mut original = record("https://a.test/x");
        original.request_headers = Some(r#"[{"name":"a","value":"b"}]"#.to_string());
        original.tab_id = Some(-1);

        let id = store.insert(&original).await.unwrap();
        let stored = store.get_all().await.unwrap().remove(0);

        original.id = Some(id);
        assert_eq!(stored, original);
    }

    #[tokio::test]
    async fn test_batch_insert_is_ordered() {
        let store = RecordStore::in_memory().await.unwrap();
        let batch: Vec<_> = (0..5).map(|i| record(&format!("https://a.test/{}", i))).collect();

        let ids = store.insert_batch(&batch).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.count().await.unwrap(), 5);

        let urls: Vec<_> = store.get_all().await.unwrap().into_iter().map(|r| r.url).collect();
        assert_eq!(urls.last().unwrap(), "https://a.test/4");
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("requests.db");

        let last = {
            let store = RecordStore::open(&path).await.unwrap();
            store.insert(&record("https://a.test/1")).await.unwrap();
            store.insert(&record("https://a.test/2")).await.unwrap()
        };

        let reopened = RecordStore::open(&path).await.unwrap();
        let next = reopened.insert(&record("https://a.test/3")).await.unwrap();
        assert!(next > last);
        assert_eq!(reopened.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_last_timestamp() {
        let store = RecordStore::in_memory().await.unwrap();
        assert_eq!(store.last_timestamp().await.unwrap(), None);

        let rec = record("https://a.test/");
        store.insert(&rec).await.unwrap();
        assert_eq!(store.last_timestamp().await.unwrap(), Some(rec.timestamp.to_rfc3339()));
    }

    #[test]
    fn test_schema_lists_every_column() {
        let sql = create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS requests"));
        assert!(sql.contains("id INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("response_checksum TEXT"));
        assert!(sql.contains("window_id INTEGER"));
        assert_eq!(sql.matches(',').count(), COLUMNS.len() - 1);
    }
}
