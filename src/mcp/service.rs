//! MCP service implementation using rmcp.
//!
//! One `SqlAssistantService` value serves one MCP session. The shared
//! [`AppState`] holds the session registry, the connection settings and the
//! chart client; the service looks its own session up by id on every call.
//! Tool results are plain text for the agent, failures included.

use crate::config::Config;
use crate::db::pool::ConnectionManager;
use crate::db::session_registry::{Session, SessionRegistry};
use crate::error::DbResult;
use crate::tools::chart::{ChartClient, ChartInput};
use crate::tools::query::{QueryToolHandler, SqlQueryInput, TableInfoInput};
use crate::tools::spec::{ConnectWithSpecsInput, SetSpecInput, SpecToolHandler};
use rmcp::{
    ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// State shared by every session of one server process.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub chart: Arc<ChartClient>,
}

impl AppState {
    pub fn new(
        registry: Arc<SessionRegistry>,
        connections: Arc<ConnectionManager>,
        chart: Arc<ChartClient>,
    ) -> Self {
        Self {
            registry,
            connections,
            chart,
        }
    }

    pub fn from_config(config: &Config) -> DbResult<Self> {
        Ok(Self::new(
            Arc::new(SessionRegistry::new(config.session_timeout_duration())),
            Arc::new(ConnectionManager::new(
                config.connect_timeout_duration(),
                config.read_only,
                config.query_executor(),
            )),
            Arc::new(ChartClient::new(
                config.quickchart_url.clone(),
                config.chart_timeout_duration(),
            )?),
        ))
    }
}

#[derive(Clone)]
pub struct SqlAssistantService {
    state: AppState,
    session_id: String,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl SqlAssistantService {
    pub fn new(state: AppState, session_id: impl Into<String>) -> Self {
        Self {
            state,
            session_id: session_id.into(),
            tool_router: Self::tool_router(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Lock this service's session, creating it on first use.
    async fn session(&self, tool: &'static str) -> OwnedMutexGuard<Session> {
        let session = self.state.registry.get_or_create(&self.session_id).await;
        let mut guard = session.lock_owned().await;
        guard.touch();
        debug!(session_id = %self.session_id, tool = tool, phase = %guard.phase(), "Tool call");
        guard
    }

    fn spec_handler(&self) -> SpecToolHandler {
        SpecToolHandler::new(self.state.connections.clone())
    }

    fn query_handler(&self) -> QueryToolHandler {
        QueryToolHandler::new(self.state.connections.clone())
    }
}

#[tool_router]
impl SqlAssistantService {
    #[tool(
        description = "Store one connection spec (dialect, host, port, database, username, password, driver, account, schema, warehouse, role, service_name, params, allowed_tables).\nReturns the current specs with secrets masked. Setting a spec to null removes it."
    )]
    pub async fn set_spec(&self, Parameters(input): Parameters<SetSpecInput>) -> String {
        let mut session = self.session("set_spec").await;
        match self.spec_handler().set_spec(&mut session, input).await {
            Ok(echo) => echo,
            Err(e) => e.to_agent_message(),
        }
    }

    #[tool(description = "List the required specs still missing for the chosen dialect.")]
    pub async fn show_missing(&self) -> String {
        let session = self.session("show_missing").await;
        self.spec_handler().show_missing(&session)
    }

    #[tool(
        description = "Build the connection URI from the collected specs.\nThe URI is echoed with the password masked."
    )]
    pub async fn build_uri(&self) -> String {
        let mut session = self.session("build_uri").await;
        self.spec_handler().build_uri(&mut session).await
    }

    #[tool(
        description = "Connect to the database using the URI from build_uri.\nIf allowed_tables is set, only those tables can be listed or described."
    )]
    pub async fn connect_db(&self) -> String {
        let mut session = self.session("connect_db").await;
        self.spec_handler().connect_db(&mut session).await
    }

    #[tool(
        description = "Replace all specs at once, then build the URI and connect in one step."
    )]
    pub async fn connect_with_specs(
        &self,
        Parameters(input): Parameters<ConnectWithSpecsInput>,
    ) -> String {
        let mut session = self.session("connect_with_specs").await;
        self.spec_handler()
            .connect_with_specs(&mut session, input)
            .await
    }

    #[tool(
        description = "Input is an empty string, output is a newline-separated list of tables in the database."
    )]
    pub async fn list_sql_database_tables(&self) -> String {
        let session = self.session("list_sql_database_tables").await;
        self.query_handler()
            .list_tables(&session)
            .await
            .unwrap_or_else(|e| e.to_agent_message())
    }

    #[tool(
        description = "Input is a comma-separated list of tables, output is the schema and sample rows for those tables.\nBe sure the tables exist by calling list_sql_database_tables first.\nExample input: table1, table2, table3"
    )]
    pub async fn info_sql_database(
        &self,
        Parameters(input): Parameters<TableInfoInput>,
    ) -> String {
        let session = self.session("info_sql_database").await;
        self.query_handler()
            .table_info(&session, input)
            .await
            .unwrap_or_else(|e| e.to_agent_message())
    }

    #[tool(
        description = "Double check a query before executing it with query_sql_db.\nReports blocked statements and syntax errors, and shows the statement that will run after the automatic row limit."
    )]
    pub async fn query_sql_checker(&self, Parameters(input): Parameters<SqlQueryInput>) -> String {
        let session = self.session("query_sql_checker").await;
        self.query_handler().check_query(&session, input).await
    }

    #[tool(
        description = "Execute a read-only SQL query and return the rows as a table.\nUnbounded SELECTs are capped automatically. If the query fails, rewrite it, check it, and try again."
    )]
    pub async fn query_sql_db(&self, Parameters(input): Parameters<SqlQueryInput>) -> String {
        let mut session = self.session("query_sql_db").await;
        self.query_handler()
            .run_query(&mut session, input)
            .await
            .unwrap_or_else(|e| e.to_agent_message())
    }

    #[tool(
        description = "Create a chart with QuickChart and return its short URL.\nDefaults: chart_type bar, width 300, height 500, format png."
    )]
    pub async fn create_chart(&self, Parameters(input): Parameters<ChartInput>) -> String {
        match self.state.chart.create_chart(&input).await {
            Ok(url) => format!("Chart created: {}", url),
            Err(e) => format!("Chart could not be created: {}", e.to_agent_message()),
        }
    }

    #[tool(
        description = "Show the session phase, connection state, masked URI and table whitelist."
    )]
    pub async fn session_status(&self) -> String {
        let session = self.session("session_status").await;
        self.spec_handler().session_status(&session)
    }
}

#[tool_handler]
impl ServerHandler for SqlAssistantService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "sql-assistant-mcp".to_owned(),
                title: Some("SQL Assistant MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Conversational SQL analysis tools.\n\
                \n\
                ## Connecting\n\
                1. `set_spec` one parameter at a time, starting with `dialect`\n\
                2. `show_missing` until all required fields are present\n\
                3. `build_uri`, then `connect_db`\n\
                Or pass everything at once to `connect_with_specs`.\n\
                \n\
                ## Answering questions\n\
                1. `list_sql_database_tables` to see what exists\n\
                2. `info_sql_database` for the relevant tables\n\
                3. `query_sql_checker` before running a query\n\
                4. `query_sql_db` to execute\n\
                Only read-only statements run. Unbounded SELECTs are capped.\n\
                \n\
                ## Charts\n\
                `create_chart` returns a short URL for the rendered image."
                    .to_string(),
            ),
        }
    }
}
