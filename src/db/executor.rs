//! Query execution engine.
//!
//! Statements run as raw SQL under a timeout. Row caps are enforced while
//! streaming: at most `cap + 1` rows are pulled from the driver so the
//! executor can tell whether the result was truncated without reading the
//! rest.

use crate::db::pool::DbPool;
use crate::db::types::{ResultSet, RowToJson};
use crate::error::{DbError, DbResult};
use crate::tools::format::{ColumnInfo, format_as_table};
use futures_util::StreamExt;
use std::future::Future;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default number of rows returned per query.
pub const DEFAULT_ROW_LIMIT: u32 = 50;

/// Maximum allowed row limit.
pub const MAX_ROW_LIMIT: u32 = 10000;

/// Rows fetched from a statement.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub columns: Vec<ColumnInfo>,
    /// One value per column, in column order
    pub rows: Vec<Vec<JsonValue>>,
    /// True if the statement produced more rows than the cap
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// ASCII table rendering, or `Empty set` when no rows came back.
    pub fn render(&self) -> String {
        let mut out = format_as_table(
            &self.columns,
            &self.rows,
            self.rows.len(),
            self.execution_time_ms,
        );
        if self.truncated {
            out.push_str(&format!(
                "(result truncated to the first {} rows)\n",
                self.rows.len()
            ));
        }
        out
    }
}

/// Query executor that handles statement execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    query_timeout: Duration,
    row_limit: u32,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self {
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }

    /// Create a new query executor with custom settings.
    pub fn with_defaults(timeout_secs: u64, row_limit: u32) -> Self {
        Self {
            query_timeout: Duration::from_secs(timeout_secs),
            row_limit: row_limit.clamp(1, MAX_ROW_LIMIT),
        }
    }

    pub fn row_limit(&self) -> u32 {
        self.row_limit
    }

    /// Run a statement and collect up to the configured row limit.
    pub async fn fetch(&self, pool: &DbPool, sql: &str) -> DbResult<QueryOutput> {
        self.fetch_limited(pool, sql, self.row_limit).await
    }

    /// Run a statement and collect up to `limit` rows.
    pub async fn fetch_limited(
        &self,
        pool: &DbPool,
        sql: &str,
        limit: u32,
    ) -> DbResult<QueryOutput> {
        let start = Instant::now();
        let limit = limit.clamp(1, MAX_ROW_LIMIT);

        debug!(
            backend = %pool.backend(),
            limit = limit,
            timeout_secs = self.query_timeout.as_secs(),
            "Executing query"
        );

        match pool {
            DbPool::MySql(p) => {
                let rows = fetch_rows(p, sql, limit, self.query_timeout).await?;
                process_rows(rows, limit, start)
            }
            DbPool::Postgres(p) => {
                let rows = fetch_rows(p, sql, limit, self.query_timeout).await?;
                process_rows(rows, limit, start)
            }
            DbPool::SQLite(p) => {
                let rows = fetch_rows(p, sql, limit, self.query_timeout).await?;
                process_rows(rows, limit, start)
            }
            DbPool::MsSql(conn) => {
                let set = self.timed(conn.fetch(sql, limit as usize)).await?;
                build_output(set, limit, start)
            }
            DbPool::DuckDb(conn) => {
                let set = self.timed(conn.fetch(sql, limit as usize)).await?;
                build_output(set, limit, start)
            }
        }
    }

    /// Ask the database for a plan without executing the statement.
    pub async fn explain(&self, pool: &DbPool, sql: &str) -> DbResult<QueryOutput> {
        let statement = sql.trim().trim_end_matches(';');
        let explain_sql = match pool {
            DbPool::SQLite(_) => format!("EXPLAIN QUERY PLAN {}", statement),
            DbPool::MsSql(conn) => {
                let start = Instant::now();
                let set = self
                    .timed(conn.explain(statement, MAX_ROW_LIMIT as usize))
                    .await?;
                return build_output(set, MAX_ROW_LIMIT, start);
            }
            _ => format!("EXPLAIN {}", statement),
        };
        self.fetch_limited(pool, &explain_sql, MAX_ROW_LIMIT).await
    }

    /// Run a driver call under the query timeout.
    async fn timed<T>(&self, call: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        match timeout(self.query_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DbError::timeout(
                "query execution",
                self.query_timeout.as_secs() as u32,
            )),
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_rows<'p, DB>(
    pool: &'p sqlx::Pool<DB>,
    sql: &'p str,
    limit: u32,
    query_timeout: Duration,
) -> DbResult<Vec<DB::Row>>
where
    DB: sqlx::Database,
    &'p sqlx::Pool<DB>: sqlx::Executor<'p, Database = DB>,
{
    use sqlx::Executor;

    let fetch_limit = limit as usize + 1;
    let rows_future = pool.fetch(sql).take(fetch_limit).collect::<Vec<_>>();

    match timeout(query_timeout, rows_future).await {
        Ok(results) => collect_rows(results),
        Err(_) => Err(DbError::timeout(
            "query execution",
            query_timeout.as_secs() as u32,
        )),
    }
}

fn collect_rows<R>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<R>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?);
    }
    Ok(rows)
}

fn process_rows<R: RowToJson>(rows: Vec<R>, limit: u32, start: Instant) -> DbResult<QueryOutput> {
    let columns = rows.first().map(|r| r.column_names()).unwrap_or_default();
    let rows = rows
        .iter()
        .take(limit as usize + 1)
        .map(|r| r.to_json_values())
        .collect();
    build_output((columns, rows), limit, start)
}

/// Shape up to `limit + 1` decoded rows into an output. A statement without
/// rows renders as an empty set whatever its columns.
fn build_output(set: ResultSet, limit: u32, start: Instant) -> DbResult<QueryOutput> {
    let execution_time_ms = start.elapsed().as_millis() as u64;
    let (columns, mut rows) = set;

    if rows.is_empty() {
        return Ok(QueryOutput {
            execution_time_ms,
            ..QueryOutput::default()
        });
    }

    let truncated = rows.len() > limit as usize;
    if truncated {
        warn!(limit = limit, "Query result truncated");
        rows.truncate(limit as usize);
    }

    Ok(QueryOutput {
        columns: columns.into_iter().map(ColumnInfo::new).collect(),
        rows,
        truncated,
        execution_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_limit_clamped() {
        assert_eq!(QueryExecutor::with_defaults(30, 0).row_limit(), 1);
        assert_eq!(QueryExecutor::with_defaults(30, 50_000).row_limit(), MAX_ROW_LIMIT);
        assert_eq!(QueryExecutor::new().row_limit(), DEFAULT_ROW_LIMIT);
    }

    #[test]
    fn test_empty_output_renders_empty_set() {
        assert_eq!(QueryOutput::default().render(), "Empty set");
    }

    #[tokio::test]
    async fn test_fetch_and_truncate_on_sqlite() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool = DbPool::SQLite(pool);
        let executor = QueryExecutor::with_defaults(5, 2);

        let out = executor
            .fetch(
                &pool,
                "SELECT 1 AS n UNION ALL SELECT 2 UNION ALL SELECT 3",
            )
            .await
            .unwrap();
        assert_eq!(out.row_count(), 2);
        assert!(out.truncated);
        assert_eq!(out.columns[0].name, "n");
        assert_eq!(out.rows[0], vec![JsonValue::from(1)]);
    }

    #[test]
    fn test_build_output_truncates_extra_row() {
        let set = (
            vec!["id".to_string(), "id".to_string()],
            vec![vec![JsonValue::from(1), JsonValue::from(2)]; 3],
        );
        let out = build_output(set, 2, Instant::now()).unwrap();
        assert!(out.truncated);
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.columns.len(), 2);

        let empty = build_output((vec!["id".to_string()], Vec::new()), 2, Instant::now()).unwrap();
        assert_eq!(empty.render(), "Empty set");
    }

    #[tokio::test]
    async fn test_explain_on_sqlite() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool = DbPool::SQLite(pool);
        let executor = QueryExecutor::new();

        assert!(executor.explain(&pool, "SELECT 1;").await.is_ok());
        assert!(executor.explain(&pool, "SELECT * FROM missing").await.is_err());
    }
}
