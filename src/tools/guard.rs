//! Query guard applied to every statement the agent wants to run.
//!
//! The guard first enforces read-only execution (see
//! [`sql_validator`](crate::tools::sql_validator)), then caps unbounded
//! SELECTs with the dialect's row-limit syntax. Both steps work on sqlparser
//! tokens, so keywords inside literals, quoted identifiers, and comments never
//! trigger a rewrite.

use crate::error::{DbError, DbResult};
use crate::models::{Dialect, RowLimitStyle};
use crate::tools::sql_validator::{tokenize, validate_readonly};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan};

/// Notice returned instead of results when a statement is blocked.
pub const BLOCKED_NOTICE: &str = "❌ BLOCKED: Only read-only queries are permitted.";

/// A statement that passed the guard, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedQuery {
    pub sql: String,
    /// True when a row cap was injected
    pub limited: bool,
}

/// Per-session guard settings.
#[derive(Debug, Clone)]
pub struct QueryGuard {
    dialect: Dialect,
    row_limit: u32,
    read_only: bool,
}

impl QueryGuard {
    pub fn new(dialect: Dialect, row_limit: u32, read_only: bool) -> Self {
        Self {
            dialect,
            row_limit,
            read_only,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// Run both guard steps. A blocked statement yields `DbError::Permission`.
    pub fn prepare(&self, sql: &str) -> DbResult<GuardedQuery> {
        if sql.trim().is_empty() {
            return Err(DbError::invalid_input("Empty SQL statement"));
        }
        if self.read_only {
            validate_readonly(sql, &self.dialect)?;
        }

        match apply_row_limit(sql, &self.dialect, self.row_limit)? {
            Some(rewritten) => Ok(GuardedQuery {
                sql: rewritten,
                limited: true,
            }),
            None => Ok(GuardedQuery {
                sql: sql.to_string(),
                limited: false,
            }),
        }
    }
}

/// Inject a row cap into an unbounded SELECT.
///
/// Returns `Ok(None)` when the statement is left alone: no SELECT keyword, an
/// aggregate `COUNT(`, or an existing `LIMIT`/`TOP`.
pub fn apply_row_limit(sql: &str, dialect: &Dialect, limit: u32) -> DbResult<Option<String>> {
    let tokens = tokenize(sql, dialect)?;
    if !needs_row_limit(&tokens) {
        return Ok(None);
    }

    let rewritten = match dialect.row_limit_style() {
        RowLimitStyle::Limit => append_limit(sql, &tokens, limit),
        RowLimitStyle::Top => insert_top(sql, &tokens, limit),
    };
    Ok(rewritten)
}

fn needs_row_limit(tokens: &[TokenWithSpan]) -> bool {
    let significant: Vec<&Token> = tokens
        .iter()
        .map(|t| &t.token)
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    let has_select = significant.iter().any(|t| is_word(t, "select"));
    let has_cap = significant
        .iter()
        .any(|t| is_word(t, "limit") || is_word(t, "top"));
    let has_count = significant
        .windows(2)
        .any(|pair| is_word(pair[0], "count") && matches!(pair[1], Token::LParen));

    has_select && !has_cap && !has_count
}

/// Strip trailing semicolons, whitespace, and comments, then append `LIMIT n`.
fn append_limit(sql: &str, tokens: &[TokenWithSpan], limit: u32) -> Option<String> {
    let last = tokens.iter().rev().find(|t| {
        !matches!(
            t.token,
            Token::Whitespace(_) | Token::SemiColon | Token::EOF
        )
    })?;
    let end = byte_offset(sql, last.span.end)?;
    Some(format!("{} LIMIT {}", &sql[..end], limit))
}

/// Rewrite the first top-level SELECT to `SELECT TOP n`.
fn insert_top(sql: &str, tokens: &[TokenWithSpan], limit: u32) -> Option<String> {
    let mut depth = 0i32;
    let mut first_select = None;
    let mut top_level_select = None;

    for t in tokens {
        match &t.token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            tok if is_word(tok, "select") => {
                first_select.get_or_insert(t);
                if depth == 0 {
                    top_level_select = Some(t);
                    break;
                }
            }
            _ => {}
        }
    }

    let target = top_level_select.or(first_select)?;
    let start = byte_offset(sql, target.span.start)?;
    let end = byte_offset(sql, target.span.end)?;
    Some(format!(
        "{}SELECT TOP {}{}",
        &sql[..start],
        limit,
        &sql[end..]
    ))
}

fn is_word(token: &Token, keyword: &str) -> bool {
    match token {
        Token::Word(w) => w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword),
        _ => false,
    }
}

/// Map a tokenizer location (1-based line and character column) to a byte offset.
fn byte_offset(sql: &str, loc: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (idx, ch) in sql.char_indices() {
        if line == loc.line && column == loc.column {
            return Some(idx);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == loc.line && column == loc.column).then_some(sql.len())
}
