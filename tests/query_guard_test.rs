//! Black-box tests for the read-only guard and row-limit rewriting.
//!
//! Random and hostile inputs must never panic, and nothing carrying a
//! mutating keyword may pass.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use sql_assistant_mcp::error::DbError;
use sql_assistant_mcp::models::Dialect;
use sql_assistant_mcp::tools::QueryGuard;
use sql_assistant_mcp::tools::guard::apply_row_limit;
use sql_assistant_mcp::tools::sql_validator::{MUTATING_KEYWORDS, validate_readonly};

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn all_dialects() -> Vec<Dialect> {
    vec![
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::MariaDb,
        Dialect::Sqlite,
        Dialect::MsSql,
        Dialect::Oracle,
        Dialect::Snowflake,
        Dialect::DuckDb,
    ]
}

fn hostile_inputs() -> Vec<String> {
    vec![
        String::new(),
        "   ".to_string(),
        "\n\r\t".to_string(),
        "\0".to_string(),
        "'OR 1=1--".to_string(),
        "'; DROP TABLE users--".to_string(),
        "select * from t; delete from t".to_string(),
        "select 'unterminated".to_string(),
        "select \"unterminated".to_string(),
        "/* open comment".to_string(),
        "SELECT TOP".to_string(),
        "((((((((select".to_string(),
        "))))select 1".to_string(),
        "ü".repeat(200),
        "select 'ünïcödé' from t".to_string(),
        "a".repeat(10_000),
        random_string(100),
        random_string(1000),
    ]
}

#[test]
fn test_hostile_inputs_never_panic() {
    for dialect in all_dialects() {
        let guard = QueryGuard::new(dialect, 50, true);
        for input in hostile_inputs() {
            let _ = guard.prepare(&input);
        }
    }
}

#[test]
fn test_random_statements_never_panic() {
    let mut rng = rand::thread_rng();
    let words = [
        "select", "from", "where", "limit", "top", "count", "(", ")", "*", ",", ";", "'", "\"",
        "--", "/*", "*/", "\n", "insert", "with", "as", "1", "t", "order", "by",
    ];
    let guard = QueryGuard::new(Dialect::Postgres, 10, true);
    let mssql = QueryGuard::new(Dialect::MsSql, 10, true);

    for _ in 0..500 {
        let len = rng.gen_range(0..20);
        let sql: Vec<&str> = (0..len)
            .map(|_| *words.choose(&mut rng).unwrap_or(&"select"))
            .collect();
        let sql = sql.join(" ");
        let _ = guard.prepare(&sql);
        let _ = mssql.prepare(&sql);
    }
}

#[test]
fn test_every_mutating_keyword_is_blocked() {
    for dialect in all_dialects() {
        for keyword in MUTATING_KEYWORDS {
            let sql = format!("{} something", keyword.to_uppercase());
            let result = validate_readonly(&sql, &dialect);
            assert!(
                matches!(result, Err(DbError::Permission { .. })),
                "{} passed for {:?}",
                sql,
                dialect
            );
        }
    }
}

#[test]
fn test_keywords_in_literals_and_comments_pass() {
    let guard = QueryGuard::new(Dialect::Postgres, 50, true);
    for sql in [
        "select 'drop table users' as note from t",
        "select \"update\" from t",
        "select id from t -- delete later",
        "select id from t /* insert here */",
    ] {
        let guarded = guard.prepare(sql).unwrap();
        assert!(guarded.limited, "{} was not limited", sql);
    }
}

#[test]
fn test_read_only_statements_pass() {
    let guard = QueryGuard::new(Dialect::MySql, 50, true);
    for sql in [
        "SHOW TABLES",
        "EXPLAIN SELECT * FROM orders",
        "SELECT COUNT(*) FROM orders",
        "WITH recent AS (SELECT * FROM orders) SELECT id FROM recent",
    ] {
        assert!(guard.prepare(sql).is_ok(), "{} was blocked", sql);
    }
}

#[test]
fn test_side_effect_statements_blocked() {
    let guard = QueryGuard::new(Dialect::Postgres, 50, true);
    for sql in [
        "EXPLAIN ANALYZE SELECT * FROM orders",
        "SELECT * INTO backup FROM orders",
        "SET search_path TO other",
        "BEGIN",
        "CALL refresh()",
        "GRANT SELECT ON orders TO bob",
        "MERGE INTO t USING s ON t.id = s.id WHEN MATCHED THEN DELETE",
    ] {
        assert!(
            matches!(guard.prepare(sql), Err(DbError::Permission { .. })),
            "{} passed",
            sql
        );
    }

    let mysql = QueryGuard::new(Dialect::MySql, 50, true);
    for sql in [
        "SELECT * INTO OUTFILE '/tmp/x' FROM t",
        "SELECT * FROM t LIMIT 1 INTO OUTFILE '/tmp/x'",
        "SELECT * FROM t INTO DUMPFILE '/tmp/y'",
    ] {
        assert!(
            matches!(mysql.prepare(sql), Err(DbError::Permission { .. })),
            "{} passed",
            sql
        );
    }
}

#[test]
fn test_guard_disabled_when_not_read_only() {
    let guard = QueryGuard::new(Dialect::Postgres, 50, false);
    let guarded = guard.prepare("DELETE FROM orders").unwrap();
    assert!(!guarded.limited);
    assert_eq!(guarded.sql, "DELETE FROM orders");
}

#[test]
fn test_row_limit_per_dialect() {
    let cases = [
        (Dialect::Postgres, "select * from t;", "select * from t LIMIT 5"),
        (Dialect::MariaDb, "select * from t", "select * from t LIMIT 5"),
        (Dialect::Sqlite, "select * from t -- note\n", "select * from t LIMIT 5"),
        (Dialect::MsSql, "select * from t", "SELECT TOP 5 * from t"),
    ];
    for (dialect, input, expected) in cases {
        assert_eq!(
            apply_row_limit(input, &dialect, 5).unwrap().as_deref(),
            Some(expected),
            "{:?}",
            dialect
        );
    }
}

#[test]
fn test_existing_limit_untouched() {
    for sql in [
        "select * from t limit 3",
        "select top 3 * from t",
        "select count(*) from t",
    ] {
        assert_eq!(apply_row_limit(sql, &Dialect::Postgres, 5).unwrap(), None);
    }
}

#[test]
fn test_limit_rewrite_is_idempotent() {
    let guard = QueryGuard::new(Dialect::Postgres, 25, true);
    let once = guard.prepare("select * from orders").unwrap();
    let twice = guard.prepare(&once.sql).unwrap();
    assert_eq!(once.sql, twice.sql);
    assert!(!twice.limited);
}
