//! Dialect registry.
//!
//! A closed set of supported engine/driver combinations plus one `Custom`
//! variant for raw scheme strings. Each known dialect carries its canonical
//! scheme, the spec fields it needs before a URI can be built, and the way
//! row caps are written for it.

use crate::models::spec::SpecKey;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
    SnowflakeDialect,
};

const SERVER_FIELDS: &[SpecKey] = &[
    SpecKey::Username,
    SpecKey::Password,
    SpecKey::Host,
    SpecKey::Port,
    SpecKey::Database,
];

const MSSQL_FIELDS: &[SpecKey] = &[
    SpecKey::Username,
    SpecKey::Password,
    SpecKey::Host,
    SpecKey::Port,
    SpecKey::Database,
    SpecKey::Driver,
];

const FILE_FIELDS: &[SpecKey] = &[SpecKey::Database];

const ORACLE_FIELDS: &[SpecKey] = &[
    SpecKey::Username,
    SpecKey::Password,
    SpecKey::Host,
    SpecKey::Port,
    SpecKey::ServiceName,
];

const SNOWFLAKE_FIELDS: &[SpecKey] = &[
    SpecKey::Username,
    SpecKey::Password,
    SpecKey::Account,
    SpecKey::Database,
    SpecKey::Schema,
];

/// Backends whose SQL caps rows with a trailing `LIMIT n`.
const LIMIT_BACKENDS: &[&str] = &["postgres", "postgresql", "mysql", "mariadb", "sqlite", "duckdb"];

/// Supported database dialects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    MySql,
    MariaDb,
    /// SQL Server over ODBC
    MsSql,
    Sqlite,
    DuckDb,
    Oracle,
    Snowflake,
    /// Raw scheme supplied by the user; no field validation applies.
    Custom(String),
}

/// How a row cap is injected into an unbounded SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLimitStyle {
    /// Append `LIMIT n`
    Limit,
    /// Rewrite the leading keyword to `SELECT TOP n`
    Top,
}

impl Dialect {
    /// Resolve a dialect name or alias.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Canonical schemes resolve to their own variant. Any other name that
    /// is a syntactically valid URI scheme becomes `Custom`.
    pub fn parse(name: &str) -> Result<Self, String> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err("Dialect cannot be empty.".to_string());
        }

        let dialect = match trimmed.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" | "postgresql+psycopg2" => Self::Postgres,
            "mysql" | "mysql+pymysql" => Self::MySql,
            "mariadb" | "mariadb+pymysql" => Self::MariaDb,
            "mssql" | "sqlserver" | "mssql+pyodbc" => Self::MsSql,
            "sqlite" => Self::Sqlite,
            "duckdb" => Self::DuckDb,
            "oracle" | "oracle+oracledb" => Self::Oracle,
            "snowflake" => Self::Snowflake,
            _ => {
                if !is_valid_scheme(trimmed) {
                    return Err(format!(
                        "Invalid dialect '{}'. Use a known alias ({}) or a URI scheme such as 'postgresql+asyncpg'.",
                        trimmed,
                        Self::known_aliases().join(", ")
                    ));
                }
                Self::Custom(trimmed.to_string())
            }
        };
        Ok(dialect)
    }

    /// Canonical connection-string scheme.
    pub fn scheme(&self) -> &str {
        match self {
            Self::Postgres => "postgresql+psycopg2",
            Self::MySql => "mysql+pymysql",
            Self::MariaDb => "mariadb+pymysql",
            Self::MsSql => "mssql+pyodbc",
            Self::Sqlite => "sqlite",
            Self::DuckDb => "duckdb",
            Self::Oracle => "oracle+oracledb",
            Self::Snowflake => "snowflake",
            Self::Custom(scheme) => scheme,
        }
    }

    /// Fields that must be non-empty before a URI can be built, in report order.
    ///
    /// `Custom` has no template and therefore no requirements.
    pub fn required_fields(&self) -> &'static [SpecKey] {
        match self {
            Self::Postgres | Self::MySql | Self::MariaDb => SERVER_FIELDS,
            Self::MsSql => MSSQL_FIELDS,
            Self::Sqlite | Self::DuckDb => FILE_FIELDS,
            Self::Oracle => ORACLE_FIELDS,
            Self::Snowflake => SNOWFLAKE_FIELDS,
            Self::Custom(_) => &[],
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Backend name without the driver suffix, e.g. `postgresql` for `postgresql+asyncpg`.
    pub fn backend(&self) -> String {
        let scheme = self.scheme();
        scheme
            .split('+')
            .next()
            .unwrap_or(scheme)
            .to_ascii_lowercase()
    }

    pub fn row_limit_style(&self) -> RowLimitStyle {
        match self {
            Self::Postgres | Self::MySql | Self::MariaDb | Self::Sqlite | Self::DuckDb => {
                RowLimitStyle::Limit
            }
            Self::MsSql | Self::Oracle | Self::Snowflake => RowLimitStyle::Top,
            Self::Custom(_) => {
                if LIMIT_BACKENDS.contains(&self.backend().as_str()) {
                    RowLimitStyle::Limit
                } else {
                    RowLimitStyle::Top
                }
            }
        }
    }

    /// SQL grammar used to tokenize and parse statements for this dialect.
    pub fn sql_dialect(&self) -> Box<dyn sqlparser::dialect::Dialect> {
        match self.backend().as_str() {
            "postgres" | "postgresql" => Box::new(PostgreSqlDialect {}),
            "mysql" | "mariadb" => Box::new(MySqlDialect {}),
            "mssql" => Box::new(MsSqlDialect {}),
            "sqlite" => Box::new(SQLiteDialect {}),
            "duckdb" => Box::new(DuckDbDialect {}),
            "snowflake" => Box::new(SnowflakeDialect {}),
            _ => Box::new(GenericDialect {}),
        }
    }

    /// Display name for messages and logs.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::MariaDb => "MariaDB",
            Self::MsSql => "SQL Server",
            Self::Sqlite => "SQLite",
            Self::DuckDb => "DuckDB",
            Self::Oracle => "Oracle",
            Self::Snowflake => "Snowflake",
            Self::Custom(scheme) => scheme,
        }
    }

    pub fn known_aliases() -> &'static [&'static str] {
        &[
            "postgres",
            "postgresql",
            "pg",
            "mysql",
            "mariadb",
            "mssql",
            "sqlserver",
            "sqlite",
            "duckdb",
            "oracle",
            "snowflake",
        ]
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

/// RFC 3986 scheme syntax: a letter followed by letters, digits, `+`, `-` or `.`.
fn is_valid_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}
