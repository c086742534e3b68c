//! MCP Client Module
//!
//! - session.rs: the process-wide shared session and its state machine
//! - transport.rs: one SSE connection with request correlation
//! - sse.rs: incremental event-stream parser
//! - decode.rs: tool result decoding
//! - tools.rs: typed consumers of the built-in tools

pub mod decode;
pub mod session;
pub mod sse;
pub mod tools;
pub mod transport;

pub use session::{SessionState, SharedSession};
