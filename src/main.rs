/// MCP Server Entry Point
///
/// Reads the server configuration from environment variables, installs
/// logging and the Prometheus recorder, then starts the transports selected
/// by `MCP_TRANSPORT_MODE`.
///
/// Environment Variables:
/// - SERVER_NAME: Name of the server (default: "mcp-mesh-server")
/// - SERVER_VERSION: Version string (default: crate version)
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both" (default: "both")
/// - HOST: Bind address for HTTP mode (default: "0.0.0.0")
/// - MCP_SSE_PORT: MCP listener port (default: 8184)
/// - METRICS_PORT: observability listener port (default: 8185)
/// - LOG_FORMAT: "text" or "json" (default: "text")

use mcp_mesh::core::config::{LogFormat, ServerConfig};
use mcp_mesh::core::{metrics, server, telemetry};

#[tokio::main]
async fn main() {
    if let Err(e) = telemetry::init_tracing(LogFormat::from_env()) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let prometheus = match metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed; /metrics disabled");
            None
        }
    };

    if let Err(e) = server::run(config, prometheus).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
