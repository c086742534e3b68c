/// Error Taxonomy
///
/// Server-side errors (`ToolError`, `RegistryError`) never cross the
/// transport as failures: the dispatcher turns them into `isError` results.
/// Client-side errors (`HandshakeError`, `ClientError`) are `Clone` because a
/// sticky session failure is handed to every waiting caller.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single tool invocation on the server.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// The caller used a name that is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Argument validation failed for the named parameter.
    #[error("invalid argument '{param}': {reason}")]
    InvalidArgument { param: String, reason: String },

    /// The handler rejected the call (domain failure, e.g. divide by zero).
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn invalid(param: impl Into<String>, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            param: param.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }
}

/// Failure while building the tool registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

/// Failure to establish a session. Fatal to the session and sticky.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandshakeError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("protocol version mismatch: requested {requested}, server answered {negotiated}")]
    VersionMismatch {
        requested: String,
        negotiated: String,
    },

    #[error("server rejected initialize: {0}")]
    Rejected(String),

    #[error("invalid handshake: {0}")]
    Protocol(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

/// Error surfaced by the shared client session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("session initialization failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("server returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The tool answered with `isError: true`.
    #[error("tool returned an error: {0}")]
    Tool(String),

    #[error("failed to parse tool result: {0}")]
    ResultParse(String),

    #[error("call cancelled: {0}")]
    Cancelled(String),

    #[error("session closed")]
    Closed,
}

impl ClientError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ClientError::Cancelled(_))
    }

    /// Whether this error ends the current session.
    pub fn is_transport_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Handshake(_) | ClientError::ConnectionLost(_)
        )
    }
}

/// Invalid environment configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid transport mode '{0}': must be 'stdio', 'http', or 'both'")]
    TransportMode(String),

    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}
