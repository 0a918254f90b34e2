//! Connection URI assembly and masking.
//!
//! `build_uri` is a pure function of the spec: it validates required fields
//! before assembling anything, and building twice yields the same string.

use crate::error::{DbError, DbResult};
use crate::models::{ConnectionSpec, Dialect, REDACTED, SpecKey};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Default Oracle listener port.
const ORACLE_DEFAULT_PORT: &str = "1521";

/// In-memory database sentinel for file-based engines.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Build a connection URI from a complete spec.
pub fn build_uri(spec: &ConnectionSpec) -> DbResult<String> {
    let dialect = spec
        .dialect()
        .ok_or_else(|| DbError::invalid_input("Missing 'dialect'."))?;

    let missing = spec.missing_fields();
    if !missing.is_empty() {
        return Err(DbError::missing_fields(
            dialect.scheme(),
            missing.iter().map(|k| k.as_str().to_string()).collect(),
        ));
    }

    let uri = match &dialect {
        Dialect::Sqlite | Dialect::DuckDb => file_uri(dialect.scheme(), spec),
        Dialect::Snowflake => snowflake_uri(spec),
        Dialect::Oracle => oracle_uri(spec),
        Dialect::MsSql => mssql_uri(spec),
        Dialect::Custom(scheme) => {
            let file_backend = matches!(dialect.backend().as_str(), "sqlite" | "duckdb");
            if file_backend && !spec.is_missing(SpecKey::Database) {
                file_uri(scheme, spec)
            } else {
                generic_uri(scheme, spec)
            }
        }
        Dialect::Postgres | Dialect::MySql | Dialect::MariaDb => {
            generic_uri(dialect.scheme(), spec)
        }
    };
    Ok(uri)
}

/// Replace the password in a URI's authority with the redaction marker.
///
/// URIs without credentials come back unchanged.
pub fn mask_uri(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest_start = scheme_end + 3;
    let rest = &uri[rest_start..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    let Some(at) = authority.rfind('@') else {
        return uri.to_string();
    };
    let userinfo = &authority[..at];
    let Some(colon) = userinfo.find(':') else {
        return uri.to_string();
    };
    if colon + 1 == userinfo.len() {
        return uri.to_string();
    }

    let password_start = rest_start + colon + 1;
    let password_end = rest_start + at;
    format!(
        "{}{}{}",
        &uri[..password_start],
        REDACTED,
        &uri[password_end..]
    )
}

fn file_uri(scheme: &str, spec: &ConnectionSpec) -> String {
    let database = spec.text(SpecKey::Database).unwrap_or_default();
    if database == MEMORY_DATABASE {
        format!("{}:///{}", scheme, MEMORY_DATABASE)
    } else {
        format!("{}:///{}", scheme, database)
    }
}

fn snowflake_uri(spec: &ConnectionSpec) -> String {
    let mut query = spec.params();
    if let Some(warehouse) = spec.text(SpecKey::Warehouse) {
        upsert(&mut query, "warehouse", warehouse);
    }
    if let Some(role) = spec.text(SpecKey::Role) {
        upsert(&mut query, "role", role);
    }

    format!(
        "snowflake://{}{}/{}/{}{}",
        auth(spec),
        encode(&spec.text(SpecKey::Account).unwrap_or_default()),
        encode(&spec.text(SpecKey::Database).unwrap_or_default()),
        encode(&spec.text(SpecKey::Schema).unwrap_or_default()),
        query_string(&query)
    )
}

fn oracle_uri(spec: &ConnectionSpec) -> String {
    let mut query = vec![(
        "service_name".to_string(),
        spec.text(SpecKey::ServiceName).unwrap_or_default(),
    )];
    for (k, v) in spec.params() {
        upsert(&mut query, &k, v);
    }

    format!(
        "{}://{}{}:{}/{}",
        Dialect::Oracle.scheme(),
        auth(spec),
        encode_host(&spec.text(SpecKey::Host).unwrap_or_default()),
        spec.text(SpecKey::Port)
            .unwrap_or_else(|| ORACLE_DEFAULT_PORT.to_string()),
        query_string(&query)
    )
}

fn mssql_uri(spec: &ConnectionSpec) -> String {
    let host = encode_host(&spec.text(SpecKey::Host).unwrap_or_default());
    let server = match spec.text(SpecKey::Port) {
        Some(port) => format!("{},{}", host, port),
        None => host,
    };

    let mut query = Vec::new();
    if let Some(driver) = spec.text(SpecKey::Driver).or_else(|| spec.param("driver")) {
        query.push(("driver".to_string(), driver));
    }
    query.extend(spec.params().into_iter().filter(|(k, _)| k != "driver"));

    format!(
        "{}://{}{}/{}{}",
        Dialect::MsSql.scheme(),
        auth(spec),
        server,
        encode(&spec.text(SpecKey::Database).unwrap_or_default()),
        query_string(&query)
    )
}

fn generic_uri(scheme: &str, spec: &ConnectionSpec) -> String {
    let port = spec
        .text(SpecKey::Port)
        .map(|p| format!(":{}", p))
        .unwrap_or_default();

    format!(
        "{}://{}{}{}/{}{}",
        scheme,
        auth(spec),
        encode_host(&spec.text(SpecKey::Host).unwrap_or_default()),
        port,
        encode(&spec.text(SpecKey::Database).unwrap_or_default()),
        query_string(&spec.params())
    )
}

/// `user:password@`, or nothing when no username is set.
fn auth(spec: &ConnectionSpec) -> String {
    match spec.text(SpecKey::Username) {
        Some(user) => format!(
            "{}:{}@",
            encode(&user),
            encode(&spec.text(SpecKey::Password).unwrap_or_default())
        ),
        None => String::new(),
    }
}

fn upsert(pairs: &mut Vec<(String, String)>, key: &str, value: String) {
    match pairs.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => pairs.push((key.to_string(), value)),
    }
}

fn query_string(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();
    format!("?{}", encoded)
}

/// Everything outside the RFC 3986 unreserved set.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a URI component.
pub fn encode(s: &str) -> String {
    utf8_percent_encode(s, URI_COMPONENT).to_string()
}

/// Bracketed IPv6 literals pass through; everything else is encoded.
fn encode_host(host: &str) -> String {
    if host.starts_with('[') && host.ends_with(']') {
        host.to_string()
    } else {
        encode(host)
    }
}
