//! Database layer.
//!
//! This module provides database access functionality:
//! - URI building and masking
//! - Live connection pools opened read-only (sqlx for PostgreSQL, MySQL and
//!   SQLite; tiberius for SQL Server; the embedded duckdb engine)
//! - Query execution with timeouts and row caps
//! - Schema introspection with sample rows
//! - Per-client session state

pub mod duck;
pub mod executor;
pub mod mssql;
pub mod pool;
pub mod schema;
pub mod session_registry;
pub mod types;
pub mod uri;

pub use duck::DuckDbConnection;
pub use executor::{QueryExecutor, QueryOutput};
pub use mssql::{MsSqlConnection, MsSqlTarget};
pub use pool::{ConnectionManager, DbPool, DriverTarget, LiveConnection};
pub use schema::{ColumnDefinition, SchemaInspector, TableDescription};
pub use session_registry::{Session, SessionRegistry, generate_session_id};
pub use types::Backend;
pub use uri::{build_uri, mask_uri};
