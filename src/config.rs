//! Configuration handling for the SQL assistant server.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::db::executor::{MAX_ROW_LIMIT, QueryExecutor};
pub use crate::db::executor::{DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_ROW_LIMIT};
use clap::{ArgAction, Parser, ValueEnum};
use std::time::Duration;
use url::Url;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_QUICKCHART_URL: &str = "https://quickchart.io";
pub const DEFAULT_CHART_TIMEOUT_SECS: u64 = 15;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Configuration for the SQL assistant server.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-assistant-mcp",
    about = "MCP server that walks an agent from connection specs to read-only SQL answers",
    version,
    author
)]
pub struct Config {
    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "MCP_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "MCP_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Row cap injected into unbounded SELECTs (1-10000)
    #[arg(
        long,
        default_value_t = DEFAULT_ROW_LIMIT,
        env = "MCP_ROW_LIMIT"
    )]
    pub row_limit: u32,

    /// Block mutating statements and open connections read-only
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "MCP_READ_ONLY"
    )]
    pub read_only: bool,

    /// Idle seconds before a session and its connection are dropped
    #[arg(
        long,
        default_value_t = DEFAULT_SESSION_TIMEOUT_SECS,
        env = "MCP_SESSION_TIMEOUT"
    )]
    pub session_timeout: u64,

    /// Base URL of the QuickChart service
    #[arg(
        long,
        default_value = DEFAULT_QUICKCHART_URL,
        env = "MCP_QUICKCHART_URL"
    )]
    pub quickchart_url: String,

    /// Chart service request timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CHART_TIMEOUT_SECS,
        env = "MCP_CHART_TIMEOUT"
    )]
    pub chart_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            row_limit: DEFAULT_ROW_LIMIT,
            read_only: true,
            session_timeout: DEFAULT_SESSION_TIMEOUT_SECS,
            quickchart_url: DEFAULT_QUICKCHART_URL.to_string(),
            chart_timeout: DEFAULT_CHART_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.query_timeout == 0 || self.connect_timeout == 0 || self.chart_timeout == 0 {
            return Err("Timeouts must be greater than 0".to_string());
        }
        if self.session_timeout == 0 {
            return Err("session_timeout must be greater than 0".to_string());
        }
        if !self.mcp_endpoint.starts_with('/') {
            return Err(format!(
                "mcp_endpoint must start with '/': {}",
                self.mcp_endpoint
            ));
        }
        let url = Url::parse(&self.quickchart_url)
            .map_err(|e| format!("Invalid quickchart_url: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "quickchart_url must be http or https: {}",
                self.quickchart_url
            ));
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Row cap clamped to the supported range.
    pub fn effective_row_limit(&self) -> u32 {
        self.row_limit.clamp(1, MAX_ROW_LIMIT)
    }

    pub fn query_executor(&self) -> QueryExecutor {
        QueryExecutor::with_defaults(self.query_timeout, self.effective_row_limit())
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn session_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn chart_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.chart_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.row_limit, 50);
        assert!(config.read_only);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            query_timeout: 60,
            connect_timeout: 15,
            session_timeout: 120,
            ..Config::default()
        };
        assert_eq!(config.query_timeout_duration(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout_duration(), Duration::from_secs(15));
        assert_eq!(config.session_timeout_duration(), Duration::from_secs(120));
    }

    #[test]
    fn test_row_limit_clamped() {
        let zero = Config {
            row_limit: 0,
            ..Config::default()
        };
        assert_eq!(zero.effective_row_limit(), 1);
        let huge = Config {
            row_limit: 1_000_000,
            ..Config::default()
        };
        assert_eq!(huge.effective_row_limit(), MAX_ROW_LIMIT);
        assert_eq!(huge.query_executor().row_limit(), MAX_ROW_LIMIT);
    }

    #[test]
    fn test_parse_cli_flags() {
        let config = Config::try_parse_from([
            "sql-assistant-mcp",
            "--transport",
            "http",
            "--row-limit",
            "25",
            "--read-only",
            "false",
            "--quickchart-url",
            "http://localhost:3400",
        ])
        .unwrap();
        assert_eq!(config.transport, TransportMode::Http);
        assert_eq!(config.row_limit, 25);
        assert!(!config.read_only);
        assert_eq!(config.quickchart_url, "http://localhost:3400");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = Config {
            quickchart_url: "ftp://charts".to_string(),
            ..Config::default()
        };
        assert!(bad_url.validate().is_err());

        let bad_endpoint = Config {
            mcp_endpoint: "mcp".to_string(),
            ..Config::default()
        };
        assert!(bad_endpoint.validate().is_err());

        let zero_timeout = Config {
            query_timeout: 0,
            ..Config::default()
        };
        assert!(zero_timeout.validate().is_err());
    }
}
