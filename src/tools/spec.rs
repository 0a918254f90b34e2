//! Spec collection and connection tools.
//!
//! These tools walk a session from an empty spec store to a live connection:
//! `set_spec`, `show_missing`, `build_uri`, `connect_db`, `connect_with_specs`
//! and `session_status`. Every outcome, failures included, is a message for
//! the agent.

use crate::db::pool::ConnectionManager;
use crate::db::session_registry::Session;
use crate::db::uri::{build_uri, mask_uri};
use crate::error::{DbError, DbResult};
use crate::models::ConnectionSpec;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

/// Input for the set_spec tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetSpecInput {
    /// Spec name: dialect, host, port, database, username, password, driver, account, schema, warehouse, role, service_name, params, allowed_tables
    pub key: String,
    /// Value to store. Strings or numbers for scalar specs, an object for params, an array of names for allowed_tables. null removes the spec.
    pub value: JsonValue,
}

/// Input for the connect_with_specs tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ConnectWithSpecsInput {
    /// All specs at once, e.g. {"dialect": "postgres", "host": "db", ...}. Replaces the current specs.
    pub specs: Map<String, JsonValue>,
}

pub struct SpecToolHandler {
    connections: Arc<ConnectionManager>,
}

impl SpecToolHandler {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Store one spec and echo the masked store.
    ///
    /// Any change drops the built URI and the connection opened from it.
    pub async fn set_spec(&self, session: &mut Session, input: SetSpecInput) -> DbResult<String> {
        let before = session.spec().clone();
        let key = session.spec_mut().set(&input.key, input.value)?;

        if *session.spec() != before {
            if session.uri().is_some() {
                info!(key = %key, "Spec changed, dropping built URI");
            }
            session.invalidate().await;
        }
        Ok(session.spec().masked_echo())
    }

    pub fn show_missing(&self, session: &Session) -> String {
        let spec = session.spec();
        match spec.dialect() {
            None => "Missing: dialect".to_string(),
            Some(dialect) if dialect.is_custom() => format!(
                "Dialect {} not in templates. Provide fields as needed or a full custom dialect string.",
                dialect.scheme()
            ),
            Some(_) => {
                let missing = spec.missing_fields();
                if missing.is_empty() {
                    "All required fields present.".to_string()
                } else {
                    let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
                    format!("Missing: {}", names.join(", "))
                }
            }
        }
    }

    /// Build the URI and echo it masked. A failure clears any previous URI.
    pub async fn build_uri(&self, session: &mut Session) -> String {
        match build_uri(session.spec()) {
            Ok(uri) => {
                if session.uri() != Some(uri.as_str()) {
                    session.invalidate().await;
                    session.set_uri(uri.clone());
                }
                let masked = mask_uri(&uri);
                info!(uri = %masked, "URI built");
                format!("URI built: {}", masked)
            }
            Err(e) => {
                session.invalidate().await;
                format!("Could not build URI: {}", e.to_agent_message())
            }
        }
    }

    /// Open a connection from the built URI with the current whitelist.
    pub async fn connect_db(&self, session: &mut Session) -> String {
        let Some(uri) = session.uri().map(str::to_string) else {
            return "No URI yet. Call build_uri first.".to_string();
        };
        let Some(dialect) = session.spec().dialect() else {
            return "No URI yet. Call build_uri first.".to_string();
        };
        let allowed = session.spec().allowed_tables();

        session.disconnect().await;
        match self
            .connections
            .connect(&uri, dialect, allowed.clone())
            .await
        {
            Ok(conn) => {
                session.set_connection(conn).await;
                let tables = match allowed {
                    Some(tables) => tables.join(", "),
                    None => "ALL (DB perms apply)".to_string(),
                };
                format!("Connected. Allowed tables: {}", tables)
            }
            Err(e) => {
                warn!(uri = %mask_uri(&uri), error = %e, "Connection failed");
                connection_failure(&e)
            }
        }
    }

    /// Replace the specs wholesale, then build and connect.
    pub async fn connect_with_specs(
        &self,
        session: &mut Session,
        input: ConnectWithSpecsInput,
    ) -> String {
        let spec = match ConnectionSpec::from_object(&input.specs) {
            Ok(spec) => spec,
            Err(e) => return e.to_agent_message(),
        };

        if *session.spec() != spec {
            *session.spec_mut() = spec;
            session.invalidate().await;
        }

        let build_msg = self.build_uri(session).await;
        if session.uri().is_none() {
            return build_msg;
        }
        let connect_msg = self.connect_db(session).await;
        format!("{} {}", build_msg, connect_msg)
    }

    /// Phase summary for the session.
    pub fn session_status(&self, session: &Session) -> String {
        let spec = session.spec();
        let dialect = spec
            .dialect()
            .map(|d| {
                if d.is_custom() {
                    d.scheme().to_string()
                } else {
                    format!("{} ({})", d.display_name(), d.scheme())
                }
            })
            .unwrap_or_else(|| "(not set)".to_string());
        let uri = session
            .uri()
            .map(mask_uri)
            .unwrap_or_else(|| "(not built)".to_string());
        let allowed = match session.connection() {
            Some(conn) => conn.allowed_tables().map(|t| t.join(", ")),
            None => spec.allowed_tables().map(|t| t.join(", ")),
        }
        .unwrap_or_else(|| "ALL".to_string());
        let missing: Vec<&str> = if spec.dialect().is_some() {
            spec.missing_fields().iter().map(|k| k.as_str()).collect()
        } else {
            vec!["dialect"]
        };

        format!(
            "Phase: {}\nDialect: {}\nConnected: {}\nURI: {}\nAllowed tables: {}\nMissing: {}",
            session.phase(),
            dialect,
            session.is_connected(),
            uri,
            allowed,
            if missing.is_empty() {
                "none".to_string()
            } else {
                missing.join(", ")
            }
        )
    }
}

/// `Connection failed: ...` without repeating the prefix.
fn connection_failure(e: &DbError) -> String {
    match e {
        DbError::Connection { .. } => e.to_agent_message(),
        _ => format!("Connection failed: {}", e.to_agent_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handler() -> SpecToolHandler {
        SpecToolHandler::new(Arc::new(ConnectionManager::default()))
    }

    async fn set(h: &SpecToolHandler, s: &mut Session, key: &str, value: JsonValue) -> DbResult<String> {
        h.set_spec(
            s,
            SetSpecInput {
                key: key.to_string(),
                value,
            },
        )
        .await
    }

    #[tokio::test]
    async fn test_set_spec_echo_masks_password() {
        let h = handler();
        let mut s = Session::new();
        let echo = set(&h, &mut s, "password", json!("p@ssw0rd")).await.unwrap();
        assert!(echo.starts_with("Spec set. Current specs (masked): "));
        assert!(!echo.contains("p@ssw0rd"));
        assert!(echo.contains("***"));
    }

    #[tokio::test]
    async fn test_set_spec_rejects_bad_params() {
        let h = handler();
        let mut s = Session::new();
        let err = set(&h, &mut s, "params", json!("sslmode=require")).await.unwrap_err();
        assert_eq!(err.to_agent_message(), "For 'params', provide a JSON object (dict).");
    }

    #[tokio::test]
    async fn test_show_missing_messages() {
        let h = handler();
        let mut s = Session::new();
        assert_eq!(h.show_missing(&s), "Missing: dialect");

        set(&h, &mut s, "dialect", json!("sqlite")).await.unwrap();
        assert_eq!(h.show_missing(&s), "Missing: database");

        set(&h, &mut s, "database", json!(":memory:")).await.unwrap();
        assert_eq!(h.show_missing(&s), "All required fields present.");

        set(&h, &mut s, "dialect", json!("clickhouse+native")).await.unwrap();
        assert_eq!(
            h.show_missing(&s),
            "Dialect clickhouse+native not in templates. Provide fields as needed or a full custom dialect string."
        );
    }

    #[tokio::test]
    async fn test_build_failure_names_missing_fields() {
        let h = handler();
        let mut s = Session::new();
        set(&h, &mut s, "dialect", json!("postgres")).await.unwrap();
        set(&h, &mut s, "host", json!("db")).await.unwrap();
        let msg = h.build_uri(&mut s).await;
        assert_eq!(
            msg,
            "Could not build URI: Missing required fields for postgresql+psycopg2: username, password, port, database"
        );
        assert!(s.uri().is_none());
    }

    #[tokio::test]
    async fn test_build_echo_is_masked() {
        let h = handler();
        let mut s = Session::new();
        for (k, v) in [
            ("dialect", json!("postgres")),
            ("username", json!("app")),
            ("password", json!("p@ssw0rd")),
            ("host", json!("db")),
            ("port", json!(5432)),
            ("database", json!("shop")),
        ] {
            set(&h, &mut s, k, v).await.unwrap();
        }
        let msg = h.build_uri(&mut s).await;
        assert_eq!(msg, "URI built: postgresql+psycopg2://app:***@db:5432/shop");
        assert!(s.uri().is_some());

        set(&h, &mut s, "port", json!(5433)).await.unwrap();
        assert!(s.uri().is_none());
    }

    #[tokio::test]
    async fn test_connect_without_uri() {
        let h = handler();
        let mut s = Session::new();
        assert_eq!(h.connect_db(&mut s).await, "No URI yet. Call build_uri first.");
    }

    #[tokio::test]
    async fn test_connect_with_specs_memory_sqlite() {
        let h = handler();
        let mut s = Session::new();
        let specs = json!({"dialect": "sqlite", "database": ":memory:"});
        let msg = h
            .connect_with_specs(
                &mut s,
                ConnectWithSpecsInput {
                    specs: specs.as_object().unwrap().clone(),
                },
            )
            .await;
        assert_eq!(
            msg,
            "URI built: sqlite:///:memory: Connected. Allowed tables: ALL (DB perms apply)"
        );
        assert!(s.is_connected());
        assert!(h.session_status(&s).starts_with("Phase: CONNECTED"));
    }

    #[tokio::test]
    async fn test_connect_with_specs_build_failure() {
        let h = handler();
        let mut s = Session::new();
        let specs = json!({"dialect": "mysql"});
        let msg = h
            .connect_with_specs(
                &mut s,
                ConnectWithSpecsInput {
                    specs: specs.as_object().unwrap().clone(),
                },
            )
            .await;
        assert!(msg.starts_with("Could not build URI: Missing required fields for mysql+pymysql"));
        assert!(!s.is_connected());
    }

    #[tokio::test]
    async fn test_unsupported_driver_reports_failure() {
        let h = handler();
        let mut s = Session::new();
        set(&h, &mut s, "dialect", json!("clickhouse+native")).await.unwrap();
        set(&h, &mut s, "host", json!("ch.internal")).await.unwrap();
        h.build_uri(&mut s).await;
        let msg = h.connect_db(&mut s).await;
        assert!(msg.starts_with("Connection failed: "));
        assert!(msg.contains("no driver for 'clickhouse+native'"));
        assert!(!s.is_connected());
        assert!(s.uri().is_some());
    }
}
