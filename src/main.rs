//! SQL Assistant MCP Server - Main entry point.
//!
//! Serves the conversational SQL tools over stdio or Streamable HTTP.
//! Logs go to stderr so stdout stays free for the stdio protocol.

use clap::Parser;
use sql_assistant_mcp::config::{Config, TransportMode};
use sql_assistant_mcp::mcp::AppState;
use sql_assistant_mcp::transport::{HttpTransport, StdioTransport, Transport};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    if let Err(msg) = config.validate() {
        eprintln!("Error: {}", msg);
        eprintln!();
        eprintln!("Usage: sql-assistant-mcp [--transport stdio|http] [--row-limit N]");
        eprintln!("       sql-assistant-mcp --transport http --http-port 8080 --mcp-endpoint /mcp");
        std::process::exit(1);
    }

    info!(
        transport = %config.transport,
        read_only = config.read_only,
        row_limit = config.effective_row_limit(),
        "Starting SQL Assistant MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = AppState::from_config(&config)?;

    // Evict idle sessions and close their pools
    state.registry.clone().start_cleanup_task();

    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(state).run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(
                state,
                &config.http_host,
                config.http_port,
                &config.mcp_endpoint,
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
