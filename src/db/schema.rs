//! Schema introspection.
//!
//! SQL queries are organized in the `queries` submodule per backend. Each
//! backend submodule provides the same two operations: list base tables and
//! fetch a table's column definitions. SQL Server and DuckDB connections
//! carry those operations themselves. Table descriptions combine the columns
//! with a few sample rows so the agent sees real values next to the types.

use crate::db::executor::{QueryExecutor, QueryOutput};
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::tools::format::format_sample_rows;
use tracing::debug;

/// Sample rows shown beneath each table definition.
pub const SAMPLE_ROWS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
            is_primary_key: false,
        }
    }

    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default_value = default.filter(|d| !d.is_empty());
        self
    }
}

/// A table's column definitions plus sample rows.
#[derive(Debug, Clone)]
pub struct TableDescription {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub sample: QueryOutput,
}

impl TableDescription {
    /// `CREATE TABLE` rendering of the columns, with the primary key last.
    pub fn create_table_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut line = format!("\t{}", c.name);
                if !c.data_type.is_empty() {
                    line.push(' ');
                    line.push_str(&c.data_type.to_uppercase());
                }
                if !c.nullable {
                    line.push_str(" NOT NULL");
                }
                if let Some(default) = &c.default_value {
                    line.push_str(" DEFAULT ");
                    line.push_str(default);
                }
                line
            })
            .collect();

        let pk: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect();
        if !pk.is_empty() {
            lines.push(format!("\tPRIMARY KEY ({})", pk.join(", ")));
        }

        format!("CREATE TABLE {} (\n{}\n)", self.name, lines.join(", \n"))
    }

    /// Definition followed by the sample-row comment block.
    pub fn render(&self) -> String {
        format!(
            "{}\n\n{}",
            self.create_table_sql(),
            format_sample_rows(&self.name, &self.sample.columns, &self.sample.rows)
        )
    }
}

/// Schema inspector for database introspection.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Base tables in the current database or schema, sorted by name.
    pub async fn list_tables(pool: &DbPool) -> DbResult<Vec<String>> {
        let mut tables = match pool {
            DbPool::Postgres(p) => postgres::list_tables(p).await?,
            DbPool::MySql(p) => mysql::list_tables(p).await?,
            DbPool::SQLite(p) => sqlite::list_tables(p).await?,
            DbPool::MsSql(conn) => conn.list_tables().await?,
            DbPool::DuckDb(conn) => conn.list_tables().await?,
        };
        tables.sort();
        debug!(backend = %pool.backend(), count = tables.len(), "Listed tables");
        Ok(tables)
    }

    /// Column definitions and sample rows for one table.
    ///
    /// The caller is responsible for checking the name against the table
    /// listing first; an empty column list is reported as a missing table.
    pub async fn describe_table(
        pool: &DbPool,
        executor: &QueryExecutor,
        table_name: &str,
    ) -> DbResult<TableDescription> {
        let columns = match pool {
            DbPool::Postgres(p) => postgres::fetch_columns(p, table_name).await?,
            DbPool::MySql(p) => mysql::fetch_columns(p, table_name).await?,
            DbPool::SQLite(p) => sqlite::fetch_columns(p, table_name).await?,
            DbPool::MsSql(conn) => conn.fetch_columns(table_name).await?,
            DbPool::DuckDb(conn) => conn.fetch_columns(table_name).await?,
        };
        if columns.is_empty() {
            return Err(DbError::schema(
                format!("Table '{}' not found", table_name),
                table_name.to_string(),
            ));
        }

        let sample_sql = pool.backend().sample_sql(table_name, SAMPLE_ROWS);
        let sample = executor
            .fetch_limited(pool, &sample_sql, SAMPLE_ROWS)
            .await?;

        Ok(TableDescription {
            name: table_name.to_string(),
            columns,
            sample,
        })
    }
}

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = current_schema()
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
                AND tc.table_name = c.table_name
                AND tc.table_schema = c.table_schema
                AND kcu.column_name = c.column_name
            ) AS is_primary_key
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        WHERE c.table_name = $1 AND c.table_schema = current_schema()
        ORDER BY c.ordinal_position
        "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY
        FROM information_schema.columns
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = DATABASE()
        ORDER BY ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;
    }
}

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn list_tables(pool: &PgPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("table_name").ok())
            .collect())
    }

    pub async fn fetch_columns(pool: &PgPool, table_name: &str) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let column_type: String = row.get("column_type");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.try_get("column_default").ok().flatten();
                let is_pk: bool = row.try_get("is_primary_key").unwrap_or(false);

                ColumnDefinition::new(name, column_type, nullable == "YES")
                    .with_primary_key(is_pk)
                    .with_default(default_value)
            })
            .collect())
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlPool, Row};

    /// MySQL may return VARBINARY instead of VARCHAR depending on charset configuration.
    fn get_string(row: &MySqlRow, column: &str) -> String {
        get_optional_string(row, column).unwrap_or_default()
    }

    fn get_optional_string(row: &MySqlRow, column: &str) -> Option<String> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .or_else(|| {
                row.try_get::<Option<Vec<u8>>, _>(column)
                    .ok()
                    .flatten()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
    }

    pub async fn list_tables(pool: &MySqlPool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| get_string(row, "TABLE_NAME"))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub async fn fetch_columns(
        pool: &MySqlPool,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let rows = sqlx::query(queries::mysql::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name = get_string(row, "COLUMN_NAME");
                let column_type = get_string(row, "COLUMN_TYPE");
                let nullable = get_string(row, "IS_NULLABLE") == "YES";
                let is_pk = get_string(row, "COLUMN_KEY") == "PRI";

                ColumnDefinition::new(name, column_type, nullable)
                    .with_primary_key(is_pk)
                    .with_default(get_optional_string(row, "COLUMN_DEFAULT"))
            })
            .collect())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};

    pub async fn list_tables(pool: &SqlitePool) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::sqlite::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
    }

    pub async fn fetch_columns(
        pool: &SqlitePool,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let pragma_query = format!("PRAGMA table_info('{}')", table_name.replace('\'', "''"));
        let rows = sqlx::query(&pragma_query).fetch_all(pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let data_type: String = row.try_get("type").unwrap_or_default();
                let notnull: i64 = row.try_get("notnull").unwrap_or(0);
                let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i64 = row.try_get("pk").unwrap_or(0);

                ColumnDefinition::new(name, data_type, notnull == 0)
                    .with_primary_key(pk > 0)
                    .with_default(default_value)
            })
            .collect())
    }
}
