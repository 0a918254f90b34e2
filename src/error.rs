//! Error types for the SQL assistant server.
//!
//! Every variant carries a message an agent can act on. Tool handlers return
//! `DbResult<T>`; the MCP service turns failures into plain text for the
//! agent, and only malformed tool arguments surface as protocol errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}{}", .sql_state.as_ref().map(|c| format!(" (SQLSTATE: {c})")).unwrap_or_default())]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Permission denied: {operation} - {reason}")]
    Permission { operation: String, reason: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Not connected. Use build_uri then connect_db.")]
    NotConnected,

    #[error("Missing required fields for {scheme}: {}", .fields.join(", "))]
    MissingFields { scheme: String, fields: Vec<String> },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Table(s) not allowed: {}. Allowed: {}", .requested.join(", "), .allowed.join(", "))]
    TableNotAllowed {
        requested: Vec<String>,
        allowed: Vec<String>,
    },

    #[error("Chart service error: {message}")]
    Chart { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn permission(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permission {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a missing-fields validation error for a dialect scheme.
    pub fn missing_fields(scheme: impl Into<String>, fields: Vec<String>) -> Self {
        Self::MissingFields {
            scheme: scheme.into(),
            fields,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a whitelist violation naming the rejected and permitted tables.
    pub fn table_not_allowed(requested: Vec<String>, allowed: Vec<String>) -> Self {
        Self::TableNotAllowed { requested, allowed }
    }

    pub fn chart(message: impl Into<String>) -> Self {
        Self::Chart {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::NotConnected => Some("Call build_uri, then connect_db"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Timeout { .. } | Self::Chart { .. }
        )
    }

    /// Render the error for an agent: message plus suggestion when one exists.
    pub fn to_agent_message(&self) -> String {
        if let Self::InvalidInput { message } = self {
            return message.clone();
        }
        match self.suggestion() {
            Some(s) if !matches!(self, Self::NotConnected) => format!("{} ({})", self, s),
            _ => self.to_string(),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection specs (host, port, database, credentials)",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced tables with info_sql_database",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Call connect_db again")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS parameters in params (e.g. sslmode)",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Convert SQL Server driver errors. Server messages keep their error number.
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match &err {
            tiberius::error::Error::Server(token) => DbError::database(
                format!("{} (error {})", token.message(), token.code()),
                None,
                "Check the SQL syntax and referenced tables with info_sql_database",
            ),
            tiberius::error::Error::Io { .. } => DbError::connection(
                format!("I/O error: {}", err),
                "Check network connectivity and database server status",
            ),
            _ => DbError::internal(format!("SQL Server driver error: {}", err)),
        }
    }
}

impl From<duckdb::Error> for DbError {
    fn from(err: duckdb::Error) -> Self {
        DbError::database(
            err.to_string(),
            None,
            "Check the SQL syntax and referenced tables with info_sql_database",
        )
    }
}

/// Convert reqwest errors raised while talking to the chart service.
impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::chart("request timed out")
        } else if err.is_connect() {
            DbError::chart(format!("cannot reach chart service: {}", err))
        } else if err.is_decode() {
            DbError::chart(format!("unexpected response body: {}", err))
        } else {
            DbError::chart(err.to_string())
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
