//! SQL Server connections over TDS.
//!
//! Built URIs use the ODBC layout (`host,port` servers and a `driver`
//! parameter that only an ODBC manager cares about), so the target is parsed
//! here rather than by a URL parser. Each connection is one tiberius client
//! shared behind an async mutex.

use crate::db::schema::ColumnDefinition;
use crate::db::types::{ResultSet, decode_binary_value, float_value};
use crate::error::{DbError, DbResult};
use crate::models::REDACTED;
use futures_util::TryStreamExt;
use percent_encoding::percent_decode_str;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

pub const DEFAULT_PORT: u16 = 1433;

const LIST_TABLES: &str = r#"
    SELECT TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_TYPE = 'BASE TABLE'
    AND TABLE_SCHEMA = SCHEMA_NAME()
    ORDER BY TABLE_NAME
    "#;

const DESCRIBE_COLUMNS: &str = r#"
    SELECT
        c.COLUMN_NAME,
        c.DATA_TYPE,
        c.CHARACTER_MAXIMUM_LENGTH,
        c.IS_NULLABLE,
        c.COLUMN_DEFAULT,
        CASE WHEN EXISTS (
            SELECT 1
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                ON tc.CONSTRAINT_NAME = k.CONSTRAINT_NAME
                AND tc.TABLE_SCHEMA = k.TABLE_SCHEMA
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
            AND tc.TABLE_NAME = c.TABLE_NAME
            AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA
            AND k.COLUMN_NAME = c.COLUMN_NAME
        ) THEN 1 ELSE 0 END AS IS_PRIMARY_KEY
    FROM INFORMATION_SCHEMA.COLUMNS c
    WHERE c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = SCHEMA_NAME()
    ORDER BY c.ORDINAL_POSITION
    "#;

/// Server, database and credentials taken from a built URI.
#[derive(Clone, PartialEq, Eq)]
pub struct MsSqlTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    password: String,
    pub params: Vec<(String, String)>,
}

impl fmt::Debug for MsSqlTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsSqlTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("params", &self.params)
            .finish()
    }
}

impl MsSqlTarget {
    /// Parse the part of a built URI after `scheme://`.
    pub fn parse(rest: &str) -> DbResult<Self> {
        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (authority, database) = location.split_once('/').unwrap_or((location, ""));
        let (userinfo, server) = authority.rsplit_once('@').unwrap_or(("", authority));
        let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));

        let (host, port) = match server.rsplit_once(',') {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    DbError::connection(
                        format!("Invalid SQL Server port '{}'", port),
                        "Set port to a number such as 1433",
                    )
                })?;
                (host, port)
            }
            None => (server, DEFAULT_PORT),
        };

        let host = decode(host);
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .map(str::to_string)
            .unwrap_or(host);
        if host.is_empty() {
            return Err(DbError::connection(
                "Missing SQL Server host",
                "Set the host spec",
            ));
        }

        Ok(Self {
            host,
            port,
            database: decode(database),
            username: decode(username),
            password: decode(password),
            params: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        })
    }

    /// Connection parameter, matched case-insensitively like ODBC keywords.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        if !self.database.is_empty() {
            config.database(&self.database);
        }
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        if self.param("TrustServerCertificate").is_some_and(is_yes) {
            config.trust_cert();
        }
        match self.param("Encrypt") {
            Some(v) if is_no(v) => config.encryption(EncryptionLevel::Off),
            Some(v) if is_yes(v) => config.encryption(EncryptionLevel::Required),
            _ => {}
        }
        config
    }
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

fn is_yes(v: &str) -> bool {
    matches!(
        v.to_ascii_lowercase().as_str(),
        "yes" | "true" | "1" | "mandatory" | "strict"
    )
}

fn is_no(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "no" | "false" | "0" | "optional")
}

type TdsClient = Client<Compat<TcpStream>>;

/// An open SQL Server client. Cloning shares the same session.
#[derive(Clone)]
pub struct MsSqlConnection {
    client: Arc<Mutex<Option<TdsClient>>>,
}

impl fmt::Debug for MsSqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsSqlConnection").finish_non_exhaustive()
    }
}

impl MsSqlConnection {
    pub async fn connect(target: &MsSqlTarget) -> DbResult<Self> {
        let config = target.config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                "Check that the SQL Server is running and accessible",
            )
        })?;
        tcp.set_nodelay(true).map_err(|e| {
            DbError::connection(
                format!("Failed to configure socket: {}", e),
                "Retry the connection",
            )
        })?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| {
                let text = e.to_string();
                let suggestion = if text.contains("Login failed") {
                    "Verify the username and password specs"
                } else if text.contains("Cannot open database") {
                    "Check that the database name exists and the login may use it"
                } else if text.to_lowercase().contains("certificate") {
                    "Set params TrustServerCertificate=yes for self-signed servers"
                } else {
                    "Verify host, port and database for the SQL Server"
                };
                DbError::connection(format!("Failed to connect: {}", text), suggestion)
            })?;

        debug!(host = %target.host, port = target.port, "SQL Server session established");
        Ok(Self {
            client: Arc::new(Mutex::new(Some(client))),
        })
    }

    /// Column names plus at most `limit + 1` rows of the first result set.
    pub async fn fetch(&self, sql: &str, limit: usize) -> DbResult<ResultSet> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::NotConnected)?;
        read_first_result(client, sql, limit).await
    }

    /// Estimated plan via `SHOWPLAN_TEXT`; the statement is compiled, not run.
    pub async fn explain(&self, sql: &str, limit: usize) -> DbResult<ResultSet> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::NotConnected)?;

        client.simple_query("SET SHOWPLAN_TEXT ON").await?.into_results().await?;
        let plan = read_first_result(client, sql, limit).await;
        client.simple_query("SET SHOWPLAN_TEXT OFF").await?.into_results().await?;
        plan
    }

    pub async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::NotConnected)?;
        let rows = client
            .simple_query(LIST_TABLES)
            .await?
            .into_first_result()
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<&str, _>(0).ok().flatten())
            .map(str::to_string)
            .collect())
    }

    pub async fn fetch_columns(&self, table_name: &str) -> DbResult<Vec<ColumnDefinition>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DbError::NotConnected)?;
        let rows = client
            .query(DESCRIBE_COLUMNS, &[&table_name])
            .await?
            .into_first_result()
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let text = |idx: usize| {
                    row.try_get::<&str, _>(idx)
                        .ok()
                        .flatten()
                        .map(str::to_string)
                };
                let mut data_type = text(1).unwrap_or_default();
                match row.try_get::<i32, _>(2).ok().flatten() {
                    Some(-1) => data_type.push_str("(max)"),
                    Some(len) => data_type.push_str(&format!("({})", len)),
                    None => {}
                }
                let is_pk = row.try_get::<i32, _>(5).ok().flatten() == Some(1);

                let nullable = text(3).as_deref() == Some("YES");

                ColumnDefinition::new(text(0).unwrap_or_default(), data_type, nullable)
                    .with_primary_key(is_pk)
                    .with_default(text(4))
            })
            .collect())
    }

    pub async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.close().await {
                debug!(error = %e, "SQL Server session did not close cleanly");
            }
        }
    }
}

/// Leftover tokens of an abandoned stream are drained by the client before
/// its next request.
async fn read_first_result(client: &mut TdsClient, sql: &str, limit: usize) -> DbResult<ResultSet> {
    let mut stream = client.simple_query(sql).await?;
    let columns: Vec<String> = stream
        .columns()
        .await?
        .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut rows = stream.into_row_stream();
    let mut out = Vec::new();
    while out.len() <= limit {
        match rows.try_next().await? {
            Some(row) if row.result_index() == 0 => out.push(decode_row(&row)),
            _ => break,
        }
    }
    Ok((columns, out))
}

fn decode_row(row: &Row) -> Vec<JsonValue> {
    (0..row.columns().len())
        .map(|idx| decode_cell(row, idx))
        .collect()
}

/// Each `try_get` only accepts its own wire type, so the first hit wins.
/// NULL comes back as `Ok(None)` for every type.
fn decode_cell(row: &Row, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return float_value(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return float_value(v as f64);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return JsonValue::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<Numeric, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<tiberius::Uuid, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        return decode_binary_value(v);
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::DateTime<chrono::FixedOffset>, _>(idx) {
        return JsonValue::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveDate, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<chrono::NaiveTime, _>(idx) {
        return JsonValue::String(v.to_string());
    }
    JsonValue::Null
}
