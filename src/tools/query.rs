//! SQL tools: table listing, schema info, query checking and execution.
//!
//! Free-text SQL always goes through the [`QueryGuard`] first. A blocked
//! statement is answered with the block notice and never reaches the
//! database.

use crate::db::pool::{ConnectionManager, LiveConnection};
use crate::db::session_registry::Session;
use crate::error::{DbError, DbResult};
use crate::models::Dialect;
use crate::tools::guard::{BLOCKED_NOTICE, GuardedQuery, QueryGuard};
use crate::tools::sql_validator::parse_statements;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input for the info_sql_database tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableInfoInput {
    /// Comma-separated table names, e.g. "customers, orders". Check them with list_sql_database_tables first.
    pub table_names: String,
}

/// Input for the query_sql_checker and query_sql_db tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SqlQueryInput {
    /// A single read-only SQL statement
    pub query: String,
}

pub struct QueryToolHandler {
    connections: Arc<ConnectionManager>,
}

impl QueryToolHandler {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    fn live<'s>(&self, session: &'s Session) -> DbResult<&'s LiveConnection> {
        session.connection().ok_or(DbError::NotConnected)
    }

    /// Guard for the session's dialect.
    ///
    /// Before a dialect is known the PostgreSQL grammar is used.
    fn guard_for(&self, session: &Session) -> QueryGuard {
        let dialect = session
            .connection()
            .map(|c| c.dialect().clone())
            .or_else(|| session.spec().dialect())
            .unwrap_or(Dialect::Postgres);
        QueryGuard::new(
            dialect,
            self.connections.executor().row_limit(),
            self.connections.read_only(),
        )
    }

    /// Run the guard; `Err` carries the message to return instead of results.
    fn guard(&self, session: &Session, sql: &str) -> Result<GuardedQuery, String> {
        match self.guard_for(session).prepare(sql) {
            Ok(guarded) => Ok(guarded),
            Err(DbError::Permission { reason, .. }) => {
                warn!(reason = %reason, "Statement blocked");
                Err(BLOCKED_NOTICE.to_string())
            }
            Err(e) => Err(e.to_agent_message()),
        }
    }

    pub async fn list_tables(&self, session: &Session) -> DbResult<String> {
        let tables = self.live(session)?.list_tables().await?;
        debug!(count = tables.len(), "Listed usable tables");
        if tables.is_empty() {
            Ok("(no usable tables found)".to_string())
        } else {
            Ok(tables.join("\n"))
        }
    }

    pub async fn table_info(&self, session: &Session, input: TableInfoInput) -> DbResult<String> {
        let names: Vec<String> = input
            .table_names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Ok("No table names provided.".to_string());
        }
        self.live(session)?.describe_tables(&names).await
    }

    /// Deterministic query check.
    ///
    /// When connected the database validates the statement with EXPLAIN;
    /// otherwise the parser for the session's dialect decides.
    pub async fn check_query(&self, session: &Session, input: SqlQueryInput) -> String {
        let guarded = match self.guard(session, &input.query) {
            Ok(guarded) => guarded,
            Err(message) => return message,
        };

        match session.connection() {
            Some(conn) => {
                if let Err(e) = conn.explain(&guarded.sql).await {
                    return format!("Query failed validation: {}", e.to_agent_message());
                }
            }
            None => {
                let dialect = self.guard_for(session).dialect().clone();
                if let Err(e) = parse_statements(&input.query, &dialect) {
                    return format!("Query has a syntax error: {}", e);
                }
            }
        }
        format!("Query looks valid.\n{}", guarded.sql)
    }

    /// Guard, then execute and render rows. Marks the session as querying.
    pub async fn run_query(&self, session: &mut Session, input: SqlQueryInput) -> DbResult<String> {
        let guarded = match self.guard(session, &input.query) {
            Ok(guarded) => guarded,
            Err(message) => return Ok(message),
        };
        let result = self.live(session)?.run_query(&guarded.sql).await;

        match result {
            Ok(output) => {
                info!(
                    row_count = output.row_count(),
                    truncated = output.truncated,
                    limited = guarded.limited,
                    execution_time_ms = output.execution_time_ms,
                    "Query executed"
                );
                session.mark_queried();
                Ok(output.render())
            }
            Err(e) => {
                warn!(error = %e, "Query failed");
                Ok(format!("Query failed: {}", e.to_agent_message()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionPhase;

    async fn connected_session(handler_connections: &ConnectionManager) -> Session {
        let conn = handler_connections
            .connect("sqlite:///:memory:", Dialect::Sqlite, None)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)")
            .execute(match conn.pool() {
                crate::db::pool::DbPool::SQLite(p) => p,
                _ => unreachable!(),
            })
            .await
            .unwrap();
        let mut session = Session::new();
        session.spec_mut().set("dialect", serde_json::json!("sqlite")).unwrap();
        session.spec_mut().set("database", serde_json::json!(":memory:")).unwrap();
        session.set_uri("sqlite:///:memory:".to_string());
        session.set_connection(conn).await;
        session
    }

    fn query(sql: &str) -> SqlQueryInput {
        SqlQueryInput {
            query: sql.to_string(),
        }
    }

    #[tokio::test]
    async fn test_not_connected() {
        let handler = QueryToolHandler::new(Arc::new(ConnectionManager::default()));
        let mut session = Session::new();
        let err = handler.list_tables(&session).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected));
        let err = handler
            .run_query(&mut session, query("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotConnected));
    }

    #[tokio::test]
    async fn test_blocked_before_connection_check() {
        let handler = QueryToolHandler::new(Arc::new(ConnectionManager::default()));
        let mut session = Session::new();
        let out = handler
            .run_query(&mut session, query("DROP TABLE x"))
            .await
            .unwrap();
        assert_eq!(out, BLOCKED_NOTICE);
    }

    #[tokio::test]
    async fn test_no_table_names() {
        let handler = QueryToolHandler::new(Arc::new(ConnectionManager::default()));
        let session = Session::new();
        let out = handler
            .table_info(
                &session,
                TableInfoInput {
                    table_names: " , ".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(out, "No table names provided.");
    }

    #[tokio::test]
    async fn test_checker_without_connection() {
        let handler = QueryToolHandler::new(Arc::new(ConnectionManager::default()));
        let session = Session::new();
        let ok = handler.check_query(&session, query("select * from orders")).await;
        assert_eq!(ok, "Query looks valid.\nselect * from orders LIMIT 50");

        let bad = handler.check_query(&session, query("select * from")).await;
        assert!(bad.starts_with("Query has a syntax error"));

        let blocked = handler.check_query(&session, query("delete from orders")).await;
        assert_eq!(blocked, BLOCKED_NOTICE);
    }

    #[tokio::test]
    async fn test_query_flow_on_sqlite() {
        let connections = Arc::new(ConnectionManager::default());
        let handler = QueryToolHandler::new(connections.clone());
        let mut session = connected_session(&connections).await;

        assert_eq!(handler.list_tables(&session).await.unwrap(), "orders");
        let checked = handler.check_query(&session, query("select * from missing")).await;
        assert!(checked.starts_with("Query failed validation"));

        let out = handler
            .run_query(&mut session, query("select count(*) as n from orders"))
            .await
            .unwrap();
        assert!(out.contains("| n |"));
        assert_eq!(session.phase(), SessionPhase::Querying);

        let failed = handler
            .run_query(&mut session, query("select * from missing"))
            .await
            .unwrap();
        assert!(failed.starts_with("Query failed: "));
    }

    #[tokio::test]
    async fn test_repeated_column_names_render_every_value() {
        let connections = Arc::new(ConnectionManager::default());
        let handler = QueryToolHandler::new(connections.clone());
        let mut session = connected_session(&connections).await;

        let out = handler
            .run_query(&mut session, query("SELECT 1 AS id, 2 AS id"))
            .await
            .unwrap();
        assert!(out.contains("| id | id |"), "{}", out);
        assert!(out.contains("|  1 |  2 |"), "{}", out);
    }
}
