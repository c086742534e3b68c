/// MCP Wire Protocol
///
/// This module contains the message structures exchanged between the tool
/// server and the shared client session:
/// - JSON-RPC 2.0 request/response/error envelopes
/// - Handshake (`initialize`) parameters and acknowledgement
/// - Tool call parameters, results and content blocks
/// - Tool descriptors returned by `tools/list`

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON-RPC version identifier carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// The single MCP protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes used by the dispatcher.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Request arrived before the session completed its handshake.
    pub const NOT_INITIALIZED: i32 = -32002;
}

/// Tool arguments as they travel on the wire.
pub type Arguments = Map<String, Value>;

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// All MCP requests follow the JSON-RPC 2.0 specification. The jsonrpc field
/// must be "2.0", id is optional (None for notifications), method specifies
/// the MCP method to call, and params contains method-specific parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MCPRequest {
    /// JSON-RPC version identifier, must be "2.0"
    pub jsonrpc: String,
    /// Request ID for correlating responses. None indicates a notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    pub method: String,
    /// Method-specific parameters as JSON value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MCPRequest {
    /// Build a request that expects a correlated response.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Build a one-way notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Responses must include jsonrpc "2.0", the request id, and either a result
/// or an error. The error field is only present when an error occurred.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MCPResponse {
    /// JSON-RPC version identifier, always "2.0"
    pub jsonrpc: String,
    /// Request ID from the original request
    #[serde(default)]
    pub id: Option<Value>,
    /// Response result, present when request succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present when request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MCPError>,
}

impl MCPResponse {
    /// A response answering request `id` with `result`.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A JSON-RPC error response. `id` is `None` when the request could
    /// not be parsed far enough to read one.
    pub fn failure(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Correlation key of this response, if it carries an id.
    ///
    /// String ids map to their contents, any other id to its JSON text, so
    /// `"7"` and `7` land on the same key.
    pub fn correlation_key(&self) -> Option<String> {
        self.id.as_ref().map(correlation_key)
    }
}

/// Normalize a JSON-RPC id into the key used by the pending-request table.
pub fn correlation_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON-RPC 2.0 error structure.
///
/// Errors follow the JSON-RPC 2.0 error format with a numeric code, message,
/// and optional additional data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MCPError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Name and version of one side of the session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Parameters of the `initialize` handshake request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub client_info: Implementation,
}

/// Handshake acknowledgement returned by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: Implementation,
}

/// Parameters of a `tools/call` request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// One unit of a tool result payload.
///
/// The `type` tag is the block's kind; `text`, `data` or `resource` is its
/// payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Image { .. } => "image",
            ContentBlock::Resource { .. } => "resource",
        }
    }
}

/// Result of a tool invocation: ordered content plus the error flag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Error result carrying the message as its only text block.
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            content: vec![ContentBlock::text(format!("Error: {}", message))],
            is_error: true,
        }
    }
}

/// MCP tool descriptor as listed by `tools/list`.
///
/// Each tool has a unique name, description, and JSON schema defining its
/// input parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MCPTool {
    /// Unique tool identifier (e.g., "echo", "calculator")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn notification_omits_id_on_the_wire() {
        let note = MCPRequest::notification("notifications/initialized", None);
        let wire = serde_json::to_value(&note).unwrap();
        assert_eq!(wire, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
        assert!(note.is_notification());
    }

    #[test]
    fn content_blocks_are_tagged_by_type() {
        let result = CallToolResult::success(vec![
            ContentBlock::text("7.00"),
            ContentBlock::Image {
                data: "aGk=".into(),
                mime_type: "image/png".into(),
            },
        ]);
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(
            wire,
            json!({
                "content": [
                    {"type": "text", "text": "7.00"},
                    {"type": "image", "data": "aGk=", "mimeType": "image/png"}
                ],
                "isError": false
            })
        );
        for (block, tagged) in result.content.iter().zip(wire["content"].as_array().unwrap()) {
            assert_eq!(tagged["type"], block.kind());
        }
    }

    #[test]
    fn error_result_prefixes_message() {
        let result = CallToolResult::error("cannot divide by zero");
        assert!(result.is_error);
        assert_eq!(result.content, vec![ContentBlock::text("Error: cannot divide by zero")]);
    }

    #[test]
    fn correlation_key_treats_string_and_number_ids_alike() {
        assert_eq!(correlation_key(&json!("7")), "7");
        assert_eq!(correlation_key(&json!(7)), "7");
    }

    #[test]
    fn tool_descriptor_uses_camel_case_schema_key() {
        let tool = MCPTool {
            name: "echo".into(),
            description: "Echo back the input message".into(),
            input_schema: json!({"type": "object"}),
        };
        let wire = serde_json::to_value(&tool).unwrap();
        assert!(wire.get("inputSchema").is_some());
        assert!(wire.get("input_schema").is_none());
    }
}
