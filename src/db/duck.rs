//! DuckDB files and in-memory databases.
//!
//! The duckdb driver is synchronous, so every call runs on the blocking pool
//! with the connection behind a std mutex.

use crate::db::schema::ColumnDefinition;
use crate::db::types::{ResultSet, decode_binary_value, float_value};
use crate::error::{DbError, DbResult};
use duckdb::types::{TimeUnit, Value};
use duckdb::{AccessMode, Config, Connection};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex};

const LIST_TABLES: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_schema = current_schema()
    AND table_type = 'BASE TABLE'
    ORDER BY table_name
    "#;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// An open DuckDB database. Cloning shares the same connection.
#[derive(Clone)]
pub struct DuckDbConnection {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl fmt::Debug for DuckDbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDbConnection").finish_non_exhaustive()
    }
}

impl DuckDbConnection {
    /// Open a database file, or an in-memory database when `path` is `None`.
    ///
    /// A read-only open fails for a missing file instead of creating it.
    pub async fn open(path: Option<String>, read_only: bool) -> DbResult<Self> {
        let conn = tokio::task::spawn_blocking(move || open_blocking(path.as_deref(), read_only))
            .await
            .map_err(|e| DbError::internal(format!("DuckDB task failed: {}", e)))??;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Column names plus at most `limit + 1` rows.
    pub async fn fetch(&self, sql: &str, limit: usize) -> DbResult<ResultSet> {
        let sql = sql.to_string();
        self.with_connection(move |conn| read_rows(conn, &sql, limit))
            .await
    }

    pub async fn list_tables(&self) -> DbResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(LIST_TABLES)?;
            let tables = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tables)
        })
        .await
    }

    pub async fn fetch_columns(&self, table_name: &str) -> DbResult<Vec<ColumnDefinition>> {
        let pragma = format!("PRAGMA table_info('{}')", table_name.replace('\'', "''"));
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&pragma)?;
            let columns = stmt
                .query_map([], |row| {
                    Ok(ColumnDefinition::new(
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        !row.get::<_, bool>(3)?,
                    )
                    .with_primary_key(row.get::<_, bool>(5)?)
                    .with_default(row.get::<_, Option<String>>(4)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    pub async fn close(&self) {
        let conn = Arc::clone(&self.conn);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = conn.lock() {
                guard.take();
            }
        })
        .await;
    }

    async fn with_connection<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DbError::internal("DuckDB connection lock poisoned"))?;
            let conn = guard.as_ref().ok_or(DbError::NotConnected)?;
            f(conn)
        })
        .await
        .map_err(|e| DbError::internal(format!("DuckDB task failed: {}", e)))?
    }
}

fn open_blocking(path: Option<&str>, read_only: bool) -> DbResult<Connection> {
    let to_connect_error = |e: duckdb::Error| {
        DbError::connection(
            format!("Failed to connect: {}", e),
            "Check that the DuckDB file exists and is readable",
        )
    };

    match path {
        None => Connection::open_in_memory().map_err(to_connect_error),
        Some(path) if read_only => {
            let config = Config::default()
                .access_mode(AccessMode::ReadOnly)
                .map_err(to_connect_error)?;
            Connection::open_with_flags(path, config).map_err(to_connect_error)
        }
        Some(path) => Connection::open(path).map_err(to_connect_error),
    }
}

fn read_rows(conn: &Connection, sql: &str, limit: usize) -> DbResult<ResultSet> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns = rows
        .as_ref()
        .map(|stmt| stmt.column_names())
        .unwrap_or_default();

    let mut out = Vec::new();
    while out.len() <= limit {
        let Some(row) = rows.next()? else {
            break;
        };
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(to_json(row.get::<_, Value>(idx)?));
        }
        out.push(values);
    }
    Ok((columns, out))
}

fn to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(v) => JsonValue::Bool(v),
        Value::TinyInt(v) => JsonValue::from(v),
        Value::SmallInt(v) => JsonValue::from(v),
        Value::Int(v) => JsonValue::from(v),
        Value::BigInt(v) => JsonValue::from(v),
        Value::UTinyInt(v) => JsonValue::from(v),
        Value::USmallInt(v) => JsonValue::from(v),
        Value::UInt(v) => JsonValue::from(v),
        Value::UBigInt(v) => JsonValue::from(v),
        Value::HugeInt(v) => JsonValue::String(v.to_string()),
        Value::Float(v) => float_value(v as f64),
        Value::Double(v) => float_value(v),
        Value::Decimal(v) => JsonValue::String(v.to_string()),
        Value::Text(v) | Value::Enum(v) => JsonValue::String(v),
        Value::Blob(v) => decode_binary_value(&v),
        Value::Date32(days) => days
            .checked_add(UNIX_EPOCH_DAYS_FROM_CE)
            .and_then(chrono::NaiveDate::from_num_days_from_ce_opt)
            .map(|d| JsonValue::String(d.to_string()))
            .unwrap_or(JsonValue::Null),
        Value::Timestamp(unit, v) => {
            chrono::DateTime::<chrono::Utc>::from_timestamp_micros(micros(unit, v))
                .map(|t| JsonValue::String(t.naive_utc().to_string()))
                .unwrap_or(JsonValue::Null)
        }
        Value::Time64(unit, v) => {
            let us = micros(unit, v);
            chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                (us / 1_000_000) as u32,
                ((us % 1_000_000) * 1_000) as u32,
            )
            .map(|t| JsonValue::String(t.to_string()))
            .unwrap_or(JsonValue::Null)
        }
        other => JsonValue::String(format!("{:?}", other)),
    }
}

fn micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_database_round_trip() {
        let db = DuckDbConnection::open(None, true).await.unwrap();
        db.fetch(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer VARCHAR NOT NULL, placed DATE)",
            0,
        )
        .await
        .unwrap();
        db.fetch(
            "INSERT INTO orders VALUES (1, 'Alice', DATE '2024-03-01'), (2, 'Bob', NULL)",
            0,
        )
        .await
        .unwrap();

        assert_eq!(db.list_tables().await.unwrap(), vec!["orders".to_string()]);

        let columns = db.fetch_columns("orders").await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);

        let (names, rows) = db
            .fetch("SELECT id, customer, placed FROM orders ORDER BY id", 10)
            .await
            .unwrap();
        assert_eq!(names, vec!["id", "customer", "placed"]);
        assert_eq!(
            rows[0],
            vec![JsonValue::from(1), JsonValue::from("Alice"), JsonValue::from("2024-03-01")]
        );
        assert_eq!(rows[1][2], JsonValue::Null);
    }

    #[tokio::test]
    async fn test_fetch_reads_one_past_limit() {
        let db = DuckDbConnection::open(None, false).await.unwrap();
        let (_, rows) = db.fetch("SELECT * FROM range(10)", 3).await.unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn test_closed_connection_reports_not_connected() {
        let db = DuckDbConnection::open(None, false).await.unwrap();
        db.close().await;
        assert!(matches!(db.list_tables().await, Err(DbError::NotConnected)));
    }

    #[tokio::test]
    async fn test_read_only_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.duckdb");
        let err = DuckDbConnection::open(Some(path.display().to_string()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_read_only_file_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.duckdb").display().to_string();

        let writable = DuckDbConnection::open(Some(path.clone()), false).await.unwrap();
        writable.fetch("CREATE TABLE t (id INTEGER)", 0).await.unwrap();
        writable.close().await;

        let reader = DuckDbConnection::open(Some(path), true).await.unwrap();
        assert_eq!(reader.list_tables().await.unwrap(), vec!["t".to_string()]);
        assert!(reader.fetch("INSERT INTO t VALUES (1)", 0).await.is_err());
    }
}
