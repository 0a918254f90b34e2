//! SQL statement validation for read-only enforcement.
//!
//! Two independent checks must both pass:
//!
//! 1. A token scan: any unquoted word matching a mutating keyword blocks the
//!    statement, as does an unquoted `INTO` after `SELECT` or a file export
//!    keyword. A tokenizer failure blocks it too.
//! 2. A parse classification: when the statement parses, every parsed
//!    statement must be a plain query, a `SHOW` variant, or a non-ANALYZE
//!    `EXPLAIN` of a read-only statement. Statements the parser cannot handle
//!    fall back to the token scan alone.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the grammar matching
//! the session dialect.

use crate::error::{DbError, DbResult};
use crate::models::Dialect;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, TokenWithSpan, Tokenizer};

/// Words that mark a statement as mutating wherever they appear unquoted.
pub const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "create", "grant", "revoke",
];

/// File export targets (MySQL `SELECT ... INTO OUTFILE/DUMPFILE`).
pub const FILE_EXPORT_KEYWORDS: &[&str] = &["outfile", "dumpfile"];

/// Type of SQL statement detected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// SELECT and other read-only queries (SELECT, SHOW, EXPLAIN, VALUES)
    Select,
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// CALL, EXECUTE, PREPARE
    ProcedureCall,
    /// GRANT, REVOKE, SET, PRAGMA, VACUUM and friends
    Administrative,
    Unknown,
}

/// Tokenize with the dialect's grammar.
pub fn tokenize(sql: &str, dialect: &Dialect) -> DbResult<Vec<TokenWithSpan>> {
    let grammar = dialect.sql_dialect();
    Tokenizer::new(grammar.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| DbError::invalid_input(format!("Failed to tokenize SQL: {}", e)))
}

/// Parse with the dialect's grammar.
pub fn parse_statements(sql: &str, dialect: &Dialect) -> Result<Vec<Statement>, ParserError> {
    let grammar = dialect.sql_dialect();
    Parser::parse_sql(grammar.as_ref(), sql)
}

/// Validate SQL for read-only execution.
///
/// Returns `Err(DbError::Permission)` when the statement is, or might be,
/// mutating, and `Err(DbError::InvalidInput)` for an empty statement.
pub fn validate_readonly(sql: &str, dialect: &Dialect) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_input("Empty SQL statement"));
    }

    let tokens = tokenize(sql, dialect)
        .map_err(|e| DbError::permission("query", format!("unreadable statement: {}", e)))?;

    if let Some(word) = find_mutating_keyword(&tokens) {
        return Err(DbError::permission(
            word.to_ascii_uppercase(),
            "mutating keyword in statement",
        ));
    }

    if let Some(word) = find_select_into(&tokens) {
        return Err(DbError::permission(
            format!("SELECT ... {}", word.to_ascii_uppercase()),
            "SELECT INTO writes a table, file or variable",
        ));
    }

    // The token scan has already passed, so unparseable input is let through.
    let Ok(statements) = parse_statements(sql, dialect) else {
        return Ok(());
    };

    for stmt in &statements {
        let (stmt_type, operation_name) = classify_statement(stmt);
        if stmt_type != SqlStatementType::Select {
            return Err(DbError::permission(
                operation_name,
                "only read-only statements are permitted",
            ));
        }
    }

    Ok(())
}

/// First unquoted word that matches a mutating keyword.
pub fn find_mutating_keyword(tokens: &[TokenWithSpan]) -> Option<&str> {
    tokens.iter().find_map(|t| match &t.token {
        Token::Word(w)
            if w.quote_style.is_none()
                && MUTATING_KEYWORDS
                    .iter()
                    .any(|kw| w.value.eq_ignore_ascii_case(kw)) =>
        {
            Some(w.value.as_str())
        }
        _ => None,
    })
}

/// Unquoted `INTO` following a `SELECT`, or any unquoted file export keyword.
///
/// Covers forms the parser rejects, such as MySQL's trailing
/// `... LIMIT 1 INTO OUTFILE '/tmp/x'`.
pub fn find_select_into(tokens: &[TokenWithSpan]) -> Option<&str> {
    let mut after_select = false;
    for t in tokens {
        let Token::Word(w) = &t.token else {
            continue;
        };
        if w.quote_style.is_some() {
            continue;
        }
        if FILE_EXPORT_KEYWORDS
            .iter()
            .any(|kw| w.value.eq_ignore_ascii_case(kw))
        {
            return Some(w.value.as_str());
        }
        if w.value.eq_ignore_ascii_case("select") {
            after_select = true;
        } else if after_select && w.value.eq_ignore_ascii_case("into") {
            return Some(w.value.as_str());
        }
    }
    None
}

/// Classify a parsed statement into a statement type.
pub fn classify_statement(stmt: &Statement) -> (SqlStatementType, &'static str) {
    match stmt {
        // =====================================================================
        // Read-only operations
        // =====================================================================
        Statement::Query(query) => {
            if is_read_only_query(query) {
                (SqlStatementType::Select, "SELECT")
            } else {
                (SqlStatementType::DmlWrite, "SELECT with side effects")
            }
        }
        Statement::ShowTables { .. } => (SqlStatementType::Select, "SHOW TABLES"),
        Statement::ShowColumns { .. } => (SqlStatementType::Select, "SHOW COLUMNS"),
        Statement::ShowDatabases { .. } => (SqlStatementType::Select, "SHOW DATABASES"),
        Statement::ShowSchemas { .. } => (SqlStatementType::Select, "SHOW SCHEMAS"),
        Statement::ShowCreate { .. } => (SqlStatementType::Select, "SHOW CREATE"),
        Statement::ShowFunctions { .. } => (SqlStatementType::Select, "SHOW FUNCTIONS"),
        Statement::ShowVariable { .. } => (SqlStatementType::Select, "SHOW VARIABLE"),
        Statement::ShowVariables { .. } => (SqlStatementType::Select, "SHOW VARIABLES"),
        Statement::ShowStatus { .. } => (SqlStatementType::Select, "SHOW STATUS"),
        Statement::ShowCollation { .. } => (SqlStatementType::Select, "SHOW COLLATION"),
        Statement::ExplainTable { .. } => (SqlStatementType::Select, "EXPLAIN TABLE"),

        // EXPLAIN ANALYZE executes its statement
        Statement::Explain {
            statement, analyze, ..
        } => {
            let (inner_type, inner_name) = classify_statement(statement);
            if *analyze {
                (SqlStatementType::Administrative, "EXPLAIN ANALYZE")
            } else if inner_type == SqlStatementType::Select {
                (SqlStatementType::Select, "EXPLAIN")
            } else {
                (inner_type, inner_name)
            }
        }

        // =====================================================================
        // DML writes
        // =====================================================================
        Statement::Insert { .. } => (SqlStatementType::DmlWrite, "INSERT"),
        Statement::Update { .. } => (SqlStatementType::DmlWrite, "UPDATE"),
        Statement::Delete { .. } => (SqlStatementType::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (SqlStatementType::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (SqlStatementType::DmlWrite, "COPY"),

        // =====================================================================
        // DDL
        // =====================================================================
        Statement::CreateTable { .. } => (SqlStatementType::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (SqlStatementType::Ddl, "CREATE VIEW"),
        Statement::CreateIndex { .. } => (SqlStatementType::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (SqlStatementType::Ddl, "CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => (SqlStatementType::Ddl, "CREATE DATABASE"),
        Statement::AlterTable { .. } => (SqlStatementType::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => (SqlStatementType::Ddl, "ALTER VIEW"),
        Statement::Drop { .. } => (SqlStatementType::Ddl, "DROP"),
        Statement::Truncate { .. } => (SqlStatementType::Ddl, "TRUNCATE"),

        // =====================================================================
        // Transaction control
        // =====================================================================
        Statement::StartTransaction { .. } => (SqlStatementType::Transaction, "BEGIN"),
        Statement::Commit { .. } => (SqlStatementType::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (SqlStatementType::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (SqlStatementType::Transaction, "SAVEPOINT"),

        // =====================================================================
        // Procedures
        // =====================================================================
        Statement::Call { .. } => (SqlStatementType::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (SqlStatementType::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => (SqlStatementType::ProcedureCall, "PREPARE"),

        // =====================================================================
        // Administrative
        // =====================================================================
        Statement::Grant { .. } => (SqlStatementType::Administrative, "GRANT"),
        Statement::Revoke { .. } => (SqlStatementType::Administrative, "REVOKE"),
        Statement::Set { .. } => (SqlStatementType::Administrative, "SET"),
        Statement::Use { .. } => (SqlStatementType::Administrative, "USE"),
        Statement::Vacuum { .. } => (SqlStatementType::Administrative, "VACUUM"),
        Statement::Pragma { .. } => (SqlStatementType::Administrative, "PRAGMA"),
        Statement::AttachDatabase { .. } => (SqlStatementType::Administrative, "ATTACH"),

        _ => (SqlStatementType::Unknown, "Unknown"),
    }
}

/// A query is read-only when no CTE or set branch modifies data and no
/// `SELECT ... INTO` creates a table.
fn is_read_only_query(query: &Query) -> bool {
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)) {
            return false;
        }
    }
    is_read_only_set_expr(&query.body)
}

fn is_read_only_set_expr(expr: &SetExpr) -> bool {
    match expr {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_set_expr(left) && is_read_only_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}
