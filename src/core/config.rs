/// Configuration and Environment Management
///
/// Server and client settings are read once at startup from environment
/// variables, each with a default. Values that are present but unparsable
/// are configuration errors rather than silent fallbacks.

use std::str::FromStr;
use std::time::Duration;

use crate::core::error::ConfigError;
use crate::core::protocol::{Implementation, PROTOCOL_VERSION};

pub const DEFAULT_MCP_PORT: u16 = 8184;
pub const DEFAULT_METRICS_PORT: u16 = 8185;

/// Get environment variable value with a default fallback.
///
/// # Example
/// ```rust
/// let port = mcp_mesh::core::config::get_env_var("PORT", "3000");
/// ```
pub fn get_env_var(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            })
        }
        _ => Ok(default),
    }
}

/// Ports are accepted as `8184` or in the `:8184` listen-address form.
fn parse_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .trim_start_matches(':')
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
        _ => Ok(default),
    }
}

fn millis(key: &str, default_ms: u64) -> Result<Duration, ConfigError> {
    parse_env(key, default_ms).map(Duration::from_millis)
}

/// Which transports the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Line-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// HTTP with Server-Sent Events
    Http,
    /// Both, concurrently
    Both,
}

impl FromStr for TransportMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "http" | "sse" => Ok(TransportMode::Http),
            "both" => Ok(TransportMode::Both),
            _ => Err(ConfigError::TransportMode(s.to_string())),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match get_env_var("LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Server name as reported in MCP initialize responses
    pub name: String,
    /// Server version string as reported in MCP initialize responses
    pub version: String,
    pub transport: TransportMode,
    /// Bind address (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    pub mcp_port: u16,
    pub metrics_port: u16,
    pub workers: usize,
    /// Interval between SSE keep-alive comments
    pub keepalive: Duration,
    /// Bound on connection teardown at shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "mcp-mesh-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transport: TransportMode::Both,
            host: "0.0.0.0".to_string(),
            mcp_port: DEFAULT_MCP_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            workers: default_workers(),
            keepalive: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// CPU count capped at 16 to avoid excessive context switching.
fn default_workers() -> usize {
    num_cpus::get().clamp(1, 16)
}

impl ServerConfig {
    /// # Errors
    /// Fails on an unknown transport mode or an unparsable number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            name: get_env_var("SERVER_NAME", &defaults.name),
            version: get_env_var("SERVER_VERSION", &defaults.version),
            transport: get_env_var("MCP_TRANSPORT_MODE", "both").parse()?,
            host: get_env_var("HOST", &defaults.host),
            mcp_port: parse_port("MCP_SSE_PORT", defaults.mcp_port)?,
            metrics_port: parse_port("METRICS_PORT", defaults.metrics_port)?,
            workers: parse_env("WORKER_THREADS", defaults.workers)?.max(1),
            keepalive: Duration::from_secs(parse_env("SSE_KEEPALIVE_SECS", 15u64)?.max(1)),
            shutdown_grace: Duration::from_secs(parse_env("SHUTDOWN_GRACE_SECS", 10u64)?),
        })
    }

    pub fn server_info(&self) -> Implementation {
        Implementation::new(&self.name, &self.version)
    }

    pub fn mcp_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.mcp_port)
    }

    pub fn metrics_bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port)
    }
}

/// Shared client session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://localhost:8184`
    pub base_url: String,
    pub sse_path: String,
    pub client_info: Implementation,
    pub protocol_version: String,
    pub handshake_timeout: Duration,
    /// Extra handshake attempts inside one initialization
    pub handshake_retries: u32,
    /// Base delay between handshake attempts, doubled each retry
    pub retry_backoff: Duration,
    /// How long `close` waits for in-flight calls
    pub close_grace: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            sse_path: "/sse".to_string(),
            client_info: Implementation::new("mcp-mesh-client", env!("CARGO_PKG_VERSION")),
            protocol_version: PROTOCOL_VERSION.to_string(),
            handshake_timeout: Duration::from_secs(5),
            handshake_retries: 0,
            retry_backoff: Duration::from_millis(200),
            close_grace: Duration::from_secs(2),
        }
    }

    /// # Errors
    /// Fails on an unparsable number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_port("MCP_SSE_PORT", DEFAULT_MCP_PORT)?;
        let base_url = get_env_var("MCP_SERVER_URL", &format!("http://localhost:{}", port));
        let defaults = Self::new(base_url);
        Ok(Self {
            client_info: Implementation::new(
                get_env_var("MCP_CLIENT_NAME", &defaults.client_info.name),
                get_env_var("MCP_CLIENT_VERSION", &defaults.client_info.version),
            ),
            handshake_timeout: millis("MCP_HANDSHAKE_TIMEOUT_MS", 5000)?,
            handshake_retries: parse_env("MCP_HANDSHAKE_RETRIES", 0u32)?,
            retry_backoff: millis("MCP_RETRY_BACKOFF_MS", 200)?,
            close_grace: millis("MCP_CLOSE_GRACE_MS", 2000)?,
            ..defaults
        })
    }

    /// Absolute URL of the SSE stream.
    pub fn sse_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.sse_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_modes_parse_case_insensitively() {
        assert_eq!("STDIO".parse::<TransportMode>().unwrap(), TransportMode::Stdio);
        assert_eq!("http".parse::<TransportMode>().unwrap(), TransportMode::Http);
        assert_eq!(" both ".parse::<TransportMode>().unwrap(), TransportMode::Both);
        assert_eq!(
            "carrier-pigeon".parse::<TransportMode>().unwrap_err(),
            ConfigError::TransportMode("carrier-pigeon".into())
        );
    }

    #[test]
    fn sse_url_joins_without_double_slash() {
        let config = ClientConfig::new("http://localhost:8184/");
        assert_eq!(config.sse_url(), "http://localhost:8184/sse");
    }

    #[test]
    fn default_server_config_uses_standard_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.mcp_bind_addr(), "0.0.0.0:8184");
        assert_eq!(config.metrics_bind_addr(), "0.0.0.0:8185");
        assert!(config.workers >= 1 && config.workers <= 16);
    }
}
