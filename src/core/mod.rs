//! Core Server Framework Module
//!
//! This module contains the core implementation shared by the server and
//! the client session:
//! - protocol.rs: JSON-RPC / MCP message types
//! - registry.rs: tool definitions, parameter schemas and validation
//! - dispatcher.rs: routes inbound requests to tools
//! - server.rs: HTTP/SSE listeners, observability endpoints, startup
//! - sse.rs / stdio.rs: server-side transports
//! - context.rs: per-call cancellation, deadline and span
//! - config.rs, telemetry.rs, metrics.rs, error.rs: ambient concerns

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sse;
pub mod stdio;
pub mod telemetry;
