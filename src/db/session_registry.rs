//! Session registry for per-client conversation state.
//!
//! Each MCP session owns one [`Session`]: its spec store, the last built URI
//! and the live connection. Sessions persist across tool calls, are created
//! on first use and evicted once idle, which also closes their pools.

use crate::db::pool::LiveConnection;
use crate::models::{ConnectionSpec, SessionPhase};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Cleanup interval for idle sessions.
const CLEANUP_INTERVAL_SECS: u64 = 30;

/// Session id used by transports that serve a single client. It lives as
/// long as the process and is never evicted.
pub const STDIO_SESSION_ID: &str = "stdio";

/// One client's conversation state.
#[derive(Debug)]
pub struct Session {
    spec: ConnectionSpec,
    uri: Option<String>,
    connection: Option<LiveConnection>,
    queried: bool,
    last_used: Instant,
}

impl Session {
    pub fn new() -> Self {
        Self {
            spec: ConnectionSpec::new(),
            uri: None,
            connection: None,
            queried: false,
            last_used: Instant::now(),
        }
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    /// Mutable access to the specs. Callers must follow up with
    /// [`invalidate`](Self::invalidate) when anything changed.
    pub fn spec_mut(&mut self) -> &mut ConnectionSpec {
        &mut self.spec
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn connection(&self) -> Option<&LiveConnection> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::derive(
            self.spec.dialect().is_some(),
            self.spec.missing_fields().len(),
            self.uri.is_some(),
            self.connection.is_some(),
            self.queried,
        )
    }

    /// Drop the built URI and close any connection opened from it.
    pub async fn invalidate(&mut self) {
        self.uri = None;
        self.disconnect().await;
    }

    pub fn set_uri(&mut self, uri: String) {
        self.uri = Some(uri);
    }

    /// Install a new connection, closing the previous one.
    pub async fn set_connection(&mut self, connection: LiveConnection) {
        self.disconnect().await;
        self.connection = Some(connection);
    }

    pub async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            conn.close().await;
        }
        self.queried = false;
    }

    pub fn mark_queried(&mut self) {
        self.queried = true;
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<Session>>>>>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Fetch a session, creating it on first use.
    pub async fn get_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(session_id) {
                return Arc::clone(session);
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_string()).or_insert_with(|| {
            info!(session_id = %session_id, "Session created");
            Arc::new(Mutex::new(Session::new()))
        });
        Arc::clone(session)
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove a session and close its connection.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                session.lock().await.disconnect().await;
                info!(session_id = %session_id, "Session removed");
                true
            }
            None => false,
        }
    }

    /// Remove every session and close its connection.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<Mutex<Session>>)> =
            self.sessions.write().await.drain().collect();
        for (id, session) in drained {
            debug!(session_id = %id, "Closing session");
            session.lock().await.disconnect().await;
        }
        info!("All sessions closed");
    }

    /// Start a background task to evict idle sessions.
    ///
    /// This should be called once when the server starts.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    /// Evict sessions idle longer than the timeout. Returns the number evicted.
    ///
    /// A session whose lock is held is in use and never expired, and the
    /// stdio session is kept for the life of the process.
    pub async fn cleanup_expired(&self) -> usize {
        let expired: Vec<(String, Arc<Mutex<Session>>)> = {
            let mut sessions = self.sessions.write().await;
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(id, _)| id.as_str() != STDIO_SESSION_ID)
                .filter(|(_, session)| {
                    session
                        .try_lock()
                        .map(|s| s.idle_for() > self.timeout)
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect();

            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        }; // Lock released before closing pools

        for (id, session) in &expired {
            let mut session = session.lock().await;
            info!(
                session_id = %id,
                phase = %session.phase(),
                idle_secs = session.idle_for().as_secs(),
                "Evicting idle session"
            );
            session.disconnect().await;
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Session cleanup finished");
        }
        expired.len()
    }
}

/// Generate a fresh session id.
pub fn generate_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}
