//! SQL Assistant MCP Library
//!
//! MCP tools that walk an AI agent from connection specs to answers:
//! collect specs per dialect, build and mask the connection URI, connect
//! read-only, inspect tables, run guarded queries and render charts.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::{AppState, SqlAssistantService};
