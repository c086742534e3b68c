//! Tool-invocation over MCP: a server that registers schema-validated tools
//! and serves them over HTTP/SSE or stdio, and a client that shares one
//! lazily established session across all callers in a process.

pub mod client;
pub mod core;
pub mod tools;

pub use crate::client::SharedSession;
pub use crate::core::context::CallContext;
pub use crate::core::error::{ClientError, HandshakeError, ToolError};
pub use crate::core::protocol::{CallToolResult, ContentBlock};
pub use crate::core::registry::{ParamSpec, ToolRegistry, ToolSchema};
