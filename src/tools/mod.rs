//! MCP tool implementations.
//!
//! This module contains the tool handlers and their helpers:
//! - `spec`: collect specs, build the URI and connect
//! - `query`: list and describe tables, check and run queries
//! - `chart`: render charts through QuickChart
//! - `guard`: read-only enforcement and automatic row limits
//! - `sql_validator`: statement classification on top of sqlparser
//! - `format`: text tables for query results and sample rows

pub mod chart;
pub mod format;
pub mod guard;
pub mod query;
pub mod spec;
pub mod sql_validator;

pub use chart::{ChartClient, ChartInput};
pub use guard::{BLOCKED_NOTICE, GuardedQuery, QueryGuard};
pub use query::{QueryToolHandler, SqlQueryInput, TableInfoInput};
pub use spec::{ConnectWithSpecsInput, SetSpecInput, SpecToolHandler};
