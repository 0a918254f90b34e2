//! Connection spec store.
//!
//! The agent collects connection parameters one at a time. Each parameter is
//! validated on entry and kept as a JSON value so that ports may arrive as
//! numbers or strings and `params` keeps its object shape.

use crate::error::{DbError, DbResult};
use crate::models::dialect::Dialect;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Redaction marker used in every echo.
pub const REDACTED: &str = "***";

/// Keys inside `params` whose values are always redacted.
const SENSITIVE_PARAM_KEYS: &[&str] = &["password", "pwd", "secret", "token"];

/// Substrings that mark a free-form value as carrying a credential.
const INLINE_SECRET_MARKERS: &[&str] = &["password=", "pwd="];

/// Connection parameter names accepted by `set_spec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecKey {
    Dialect,
    Host,
    Port,
    Database,
    Username,
    Password,
    Driver,
    Account,
    Schema,
    Warehouse,
    Role,
    ServiceName,
    Params,
    AllowedTables,
}

impl SpecKey {
    pub const ALL: &'static [SpecKey] = &[
        SpecKey::Dialect,
        SpecKey::Host,
        SpecKey::Port,
        SpecKey::Database,
        SpecKey::Username,
        SpecKey::Password,
        SpecKey::Driver,
        SpecKey::Account,
        SpecKey::Schema,
        SpecKey::Warehouse,
        SpecKey::Role,
        SpecKey::ServiceName,
        SpecKey::Params,
        SpecKey::AllowedTables,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dialect => "dialect",
            Self::Host => "host",
            Self::Port => "port",
            Self::Database => "database",
            Self::Username => "username",
            Self::Password => "password",
            Self::Driver => "driver",
            Self::Account => "account",
            Self::Schema => "schema",
            Self::Warehouse => "warehouse",
            Self::Role => "role",
            Self::ServiceName => "service_name",
            Self::Params => "params",
            Self::AllowedTables => "allowed_tables",
        }
    }

    /// Parse a key name, case-insensitively.
    pub fn parse(name: &str) -> DbResult<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| {
                DbError::invalid_input(format!(
                    "Unknown spec key '{}'. Valid keys: {}",
                    name.trim(),
                    Self::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

impl std::fmt::Display for SpecKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incrementally collected connection parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionSpec {
    values: BTreeMap<SpecKey, Value>,
}

impl ConnectionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a whole object of specs and build a fresh store from it.
    ///
    /// Every entry must pass the same checks as [`ConnectionSpec::set`]; the
    /// first failure aborts and nothing is kept.
    pub fn from_object(object: &Map<String, Value>) -> DbResult<Self> {
        let mut spec = Self::new();
        for (name, value) in object {
            spec.set(name, value.clone())?;
        }
        Ok(spec)
    }

    /// Set a field by name. Returns the parsed key on success.
    pub fn set(&mut self, name: &str, value: Value) -> DbResult<SpecKey> {
        let key = SpecKey::parse(name)?;
        self.set_key(key, value)?;
        Ok(key)
    }

    /// Set a field. A `null` value removes it.
    pub fn set_key(&mut self, key: SpecKey, value: Value) -> DbResult<()> {
        if value.is_null() {
            self.values.remove(&key);
            return Ok(());
        }

        let value = match key {
            SpecKey::Params => {
                if !value.is_object() {
                    return Err(DbError::invalid_input(
                        "For 'params', provide a JSON object (dict).",
                    ));
                }
                value
            }
            SpecKey::AllowedTables => {
                let Value::Array(items) = &value else {
                    return Err(DbError::invalid_input(
                        "For 'allowed_tables', provide a JSON array of table names.",
                    ));
                };
                if items.iter().any(|v| !v.is_string()) {
                    return Err(DbError::invalid_input(
                        "For 'allowed_tables', every entry must be a table name string.",
                    ));
                }
                value
            }
            SpecKey::Dialect => {
                let Value::String(name) = &value else {
                    return Err(DbError::invalid_input(
                        "For 'dialect', provide a dialect name such as 'postgres' or 'sqlite'.",
                    ));
                };
                Dialect::parse(name).map_err(DbError::invalid_input)?;
                Value::String(name.trim().to_string())
            }
            _ => match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => value,
                _ => {
                    return Err(DbError::invalid_input(format!(
                        "For '{}', provide a string or number.",
                        key
                    )));
                }
            },
        };

        self.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: SpecKey) -> Option<&Value> {
        self.values.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scalar field rendered as text, or `None` when the field is missing.
    pub fn text(&self, key: SpecKey) -> Option<String> {
        self.values
            .get(&key)
            .filter(|v| !is_missing_value(v))
            .and_then(scalar_text)
    }

    /// The resolved dialect, when one has been set.
    pub fn dialect(&self) -> Option<Dialect> {
        self.text(SpecKey::Dialect)
            .and_then(|name| Dialect::parse(&name).ok())
    }

    /// Free-form driver parameters in key order, null entries dropped.
    pub fn params(&self) -> Vec<(String, String)> {
        match self.values.get(&SpecKey::Params) {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), scalar_text(v).unwrap_or_else(|| v.to_string())))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Non-empty table whitelist, if one is set.
    pub fn allowed_tables(&self) -> Option<Vec<String>> {
        match self.values.get(&SpecKey::AllowedTables) {
            Some(Value::Array(items)) if !items.is_empty() => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn is_missing(&self, key: SpecKey) -> bool {
        self.values.get(&key).is_none_or(is_missing_value)
    }

    /// Required fields not yet provided for the current dialect, in order.
    ///
    /// Without a dialect only `dialect` itself is reported.
    pub fn missing_fields(&self) -> Vec<SpecKey> {
        let Some(dialect) = self.dialect() else {
            return vec![SpecKey::Dialect];
        };

        dialect
            .required_fields()
            .iter()
            .copied()
            .filter(|key| match key {
                SpecKey::Driver if dialect == Dialect::MsSql => {
                    self.is_missing(SpecKey::Driver) && self.param("driver").is_none()
                }
                _ => self.is_missing(*key),
            })
            .collect()
    }

    /// Value of a single entry in `params`, case-sensitive like the driver sees it.
    pub fn param(&self, name: &str) -> Option<String> {
        match self.values.get(&SpecKey::Params) {
            Some(Value::Object(map)) => map
                .get(name)
                .filter(|v| !is_missing_value(v))
                .and_then(scalar_text),
            _ => None,
        }
    }

    /// JSON rendering of the store with every secret redacted.
    pub fn masked(&self) -> Value {
        let mut out = Map::new();
        for (key, value) in &self.values {
            let masked = match key {
                SpecKey::Password => Value::String(REDACTED.to_string()),
                SpecKey::Params => mask_params(value),
                _ => mask_inline_secret(value),
            };
            out.insert(key.as_str().to_string(), masked);
        }
        Value::Object(out)
    }

    /// The confirmation echoed after every successful mutation.
    pub fn masked_echo(&self) -> String {
        format!("Spec set. Current specs (masked): {}", self.masked())
    }
}

/// Absent-equivalent values: null, blank strings, empty arrays and objects.
pub fn is_missing_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Text form of a scalar JSON value.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn carries_inline_secret(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    INLINE_SECRET_MARKERS.iter().any(|m| lower.contains(m))
}

fn mask_inline_secret(value: &Value) -> Value {
    match value {
        Value::String(s) if carries_inline_secret(s) => Value::String(REDACTED.to_string()),
        Value::Array(items) => Value::Array(items.iter().map(mask_inline_secret).collect()),
        _ => value.clone(),
    }
}

fn mask_params(value: &Value) -> Value {
    let Value::Object(map) = value else {
        return mask_inline_secret(value);
    };
    let masked = map
        .iter()
        .map(|(k, v)| {
            let lower = k.to_ascii_lowercase();
            let v = if SENSITIVE_PARAM_KEYS.contains(&lower.as_str()) {
                Value::String(REDACTED.to_string())
            } else {
                mask_inline_secret(v)
            };
            (k.clone(), v)
        })
        .collect();
    Value::Object(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(pairs: &[(&str, Value)]) -> ConnectionSpec {
        let mut s = ConnectionSpec::new();
        for (k, v) in pairs {
            s.set(k, v.clone()).unwrap();
        }
        s
    }

    #[test]
    fn test_key_parse_is_case_insensitive() {
        assert_eq!(SpecKey::parse("HOST").unwrap(), SpecKey::Host);
        assert_eq!(SpecKey::parse(" Service_Name ").unwrap(), SpecKey::ServiceName);
    }

    #[test]
    fn test_unknown_key_lists_valid_keys() {
        let err = SpecKey::parse("hostname").unwrap_err().to_string();
        assert!(err.contains("hostname"));
        assert!(err.contains("allowed_tables"));
    }

    #[test]
    fn test_params_requires_object() {
        let mut s = ConnectionSpec::new();
        let err = s.set("params", json!("sslmode=require")).unwrap_err();
        assert!(err.to_string().contains("For 'params', provide a JSON object (dict)."));
        assert!(s.is_empty());
    }

    #[test]
    fn test_allowed_tables_requires_string_array() {
        let mut s = ConnectionSpec::new();
        let err = s.set("allowed_tables", json!("Customers")).unwrap_err();
        assert!(
            err.to_string()
                .contains("For 'allowed_tables', provide a JSON array of table names.")
        );
        assert!(s.set("allowed_tables", json!(["a", 1])).is_err());
        assert!(s.set("allowed_tables", json!(["a", "b"])).is_ok());
        assert_eq!(s.allowed_tables().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_null_removes_field() {
        let mut s = spec(&[("host", json!("db"))]);
        s.set("host", Value::Null).unwrap();
        assert!(s.get(SpecKey::Host).is_none());
    }

    #[test]
    fn test_missing_without_dialect() {
        let s = spec(&[("host", json!("db"))]);
        assert_eq!(s.missing_fields(), vec![SpecKey::Dialect]);
    }

    #[test]
    fn test_missing_fields_in_required_order() {
        let s = spec(&[
            ("dialect", json!("postgres")),
            ("host", json!("db")),
            ("password", json!("  ")),
        ]);
        assert_eq!(
            s.missing_fields(),
            vec![SpecKey::Username, SpecKey::Password, SpecKey::Port, SpecKey::Database]
        );
    }

    #[test]
    fn test_missing_empty_when_complete() {
        let s = spec(&[
            ("dialect", json!("pg")),
            ("host", json!("db")),
            ("port", json!(5432)),
            ("database", json!("sales")),
            ("username", json!("u")),
            ("password", json!("p")),
        ]);
        assert!(s.missing_fields().is_empty());
    }

    #[test]
    fn test_missing_shrinks_to_empty_for_every_dialect() {
        let dialects = [
            Dialect::Postgres,
            Dialect::MySql,
            Dialect::MariaDb,
            Dialect::MsSql,
            Dialect::Sqlite,
            Dialect::DuckDb,
            Dialect::Oracle,
            Dialect::Snowflake,
            Dialect::Custom("clickhouse+native".to_string()),
        ];
        for dialect in dialects {
            let mut s = spec(&[("dialect", json!(dialect.scheme()))]);
            assert_eq!(s.dialect(), Some(dialect.clone()));

            let required = dialect.required_fields();
            assert_eq!(s.missing_fields(), required.to_vec(), "{:?}", dialect);
            for (filled, key) in required.iter().enumerate() {
                let value = if *key == SpecKey::Port { json!(1) } else { json!("x") };
                s.set_key(*key, value).unwrap();

                let missing = s.missing_fields();
                assert_eq!(missing, required[filled + 1..].to_vec(), "{:?}", dialect);
                assert_eq!(missing.is_empty(), filled + 1 == required.len());
            }
            assert!(s.missing_fields().is_empty(), "{:?}", dialect);
        }
    }

    #[test]
    fn test_mssql_driver_from_params() {
        let s = spec(&[
            ("dialect", json!("mssql")),
            ("host", json!("db")),
            ("port", json!(1433)),
            ("database", json!("sales")),
            ("username", json!("u")),
            ("password", json!("p")),
            ("params", json!({"driver": "ODBC Driver 18 for SQL Server"})),
        ]);
        assert!(s.missing_fields().is_empty());
    }

    #[test]
    fn test_custom_dialect_has_no_requirements() {
        let s = spec(&[("dialect", json!("clickhouse+native"))]);
        assert!(s.missing_fields().is_empty());
        assert!(s.dialect().unwrap().is_custom());
    }

    #[test]
    fn test_invalid_dialect_rejected() {
        let mut s = ConnectionSpec::new();
        assert!(s.set("dialect", json!("no such://thing")).is_err());
        assert!(s.set("dialect", json!(5)).is_err());
    }

    #[test]
    fn test_scalar_rejects_structures() {
        let mut s = ConnectionSpec::new();
        assert!(s.set("host", json!({"a": 1})).is_err());
        assert!(s.set("port", json!([5432])).is_err());
    }

    #[test]
    fn test_masked_echo_hides_secrets() {
        let s = spec(&[
            ("dialect", json!("postgres")),
            ("password", json!("p@ssw0rd")),
            ("database", json!("Server=x;PWD=p@ssw0rd")),
            ("params", json!({"Token": "p@ssw0rd", "sslmode": "require"})),
        ]);
        let echo = s.masked_echo();
        assert!(echo.starts_with("Spec set. Current specs (masked): "));
        assert!(!echo.contains("p@ssw0rd"));
        assert!(echo.contains("\"password\":\"***\""));
        assert!(echo.contains("\"Token\":\"***\""));
        assert!(echo.contains("\"sslmode\":\"require\""));
    }

    #[test]
    fn test_params_rendered_as_text() {
        let s = spec(&[("params", json!({"Encrypt": "no", "timeout": 30, "x": null}))]);
        assert_eq!(
            s.params(),
            vec![
                ("Encrypt".to_string(), "no".to_string()),
                ("timeout".to_string(), "30".to_string())
            ]
        );
    }

    #[test]
    fn test_from_object_aborts_on_first_error() {
        let obj = json!({"dialect": "sqlite", "params": "bad"});
        let err = ConnectionSpec::from_object(obj.as_object().unwrap()).unwrap_err();
        assert!(err.to_string().contains("params"));
    }
}
