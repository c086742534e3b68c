/// MCP Request Dispatcher
///
/// Transport-independent handling of one inbound JSON-RPC message. Both the
/// SSE transport and the STDIO transport feed every decoded request through
/// `Dispatcher::handle` and write back whatever response it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use serde_json::{Value, json};
use tracing::field;

use crate::core::context::CallContext;
use crate::core::error::ToolError;
use crate::core::metrics;
use crate::core::protocol::{
    Arguments, CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JSONRPC_VERSION, MCPRequest, MCPResponse, PROTOCOL_VERSION, codes,
};
use crate::core::registry::ToolRegistry;

/// Per-connection handshake state.
#[derive(Debug, Default)]
pub struct ConnectionState {
    initialized: AtomicBool,
    client: OnceLock<Implementation>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn client(&self) -> Option<&Implementation> {
        self.client.get()
    }
}

/// Routes requests to handshake, discovery and tool execution.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    server_info: Implementation,
}

impl Dispatcher {
    /// `server_info` is what `initialize` reports back to clients.
    pub fn new(registry: Arc<ToolRegistry>, server_info: Implementation) -> Self {
        Self {
            registry,
            server_info,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// Handle one message. Returns `None` for notifications.
    pub fn handle(
        &self,
        ctx: &CallContext,
        conn: &ConnectionState,
        req: MCPRequest,
    ) -> Option<MCPResponse> {
        if req.jsonrpc != JSONRPC_VERSION {
            return req.id.map(|id| {
                MCPResponse::failure(
                    Some(id),
                    codes::INVALID_REQUEST,
                    format!("Unsupported jsonrpc version: {}", req.jsonrpc),
                )
            });
        }

        let Some(id) = req.id else {
            if req.method == "notifications/initialized" {
                tracing::debug!("client confirmed initialization");
            } else {
                tracing::debug!(method = %req.method, "ignoring notification");
            }
            return None;
        };
        let id = Some(id);

        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(conn, id, req.params),
            "ping" => MCPResponse::success(id, json!({})),
            "tools/list" | "tools/call" if !conn.is_initialized() => MCPResponse::failure(
                id,
                codes::NOT_INITIALIZED,
                "Session not initialized",
            ),
            "tools/list" => MCPResponse::success(id, json!({ "tools": self.registry.list() })),
            "tools/call" => match req.params.map(serde_json::from_value::<CallToolParams>) {
                Some(Ok(params)) => {
                    let result = self.call_tool(ctx, &params.name, &params.arguments);
                    match serde_json::to_value(&result) {
                        Ok(value) => MCPResponse::success(id, value),
                        Err(e) => MCPResponse::failure(id, codes::INTERNAL_ERROR, e.to_string()),
                    }
                }
                Some(Err(e)) => {
                    MCPResponse::failure(id, codes::INVALID_PARAMS, format!("Invalid params: {}", e))
                }
                None => MCPResponse::failure(id, codes::INVALID_PARAMS, "Invalid params"),
            },
            _ => MCPResponse::failure(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", req.method),
            ),
        };

        Some(response)
    }

    fn handle_initialize(
        &self,
        conn: &ConnectionState,
        id: Option<Value>,
        params: Option<Value>,
    ) -> MCPResponse {
        let params = match params.map(serde_json::from_value::<InitializeParams>) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return MCPResponse::failure(
                    id,
                    codes::INVALID_PARAMS,
                    format!("Invalid initialize params: {}", e),
                );
            }
            None => return MCPResponse::failure(id, codes::INVALID_PARAMS, "Invalid params"),
        };

        if params.protocol_version != PROTOCOL_VERSION {
            tracing::warn!(
                requested = %params.protocol_version,
                supported = PROTOCOL_VERSION,
                "client requested an unsupported protocol version"
            );
        }
        tracing::info!(
            client.name = %params.client_info.name,
            client.version = %params.client_info.version,
            "client initialized"
        );
        let _ = conn.client.set(params.client_info);
        conn.initialized.store(true, Ordering::Release);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({ "tools": {} }),
            server_info: self.server_info.clone(),
        };
        match serde_json::to_value(result) {
            Ok(value) => MCPResponse::success(id, value),
            Err(e) => MCPResponse::failure(id, codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    /// Execute a tool call and package the outcome as a result.
    ///
    /// Every failure (unknown tool, invalid arguments, handler error) becomes
    /// an `isError` result; nothing here can end the connection.
    pub fn call_tool(&self, ctx: &CallContext, name: &str, arguments: &Arguments) -> CallToolResult {
        let definition = match self.registry.lookup(name) {
            Ok(definition) => definition,
            Err(e) => {
                tracing::warn!(parent: ctx.span(), tool.name = %name, "call to unknown tool");
                metrics::record_unknown_tool();
                return CallToolResult::error(e);
            }
        };

        let span = tracing::info_span!(
            parent: ctx.span(),
            "mcp.tool.call",
            tool.name = %name,
            tool.outcome = field::Empty,
        );
        let _entered = span.enter();

        let started = Instant::now();
        let outcome = definition.invoke(arguments);
        let elapsed = started.elapsed();
        metrics::record_tool_call(name, outcome.is_ok(), elapsed);

        match outcome {
            Ok(output) => {
                span.record("tool.outcome", "success");
                tracing::debug!(elapsed_ms = elapsed.as_secs_f64() * 1e3, "tool call succeeded");
                CallToolResult::success(output.into_content())
            }
            Err(e) => {
                span.record("tool.outcome", "error");
                match &e {
                    ToolError::Execution(_) => tracing::info!(error = %e, "tool rejected call"),
                    _ => tracing::warn!(error = %e, "tool call failed validation"),
                }
                CallToolResult::error(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::ContentBlock;
    use crate::core::registry::{ParamSpec, ToolOutput, ToolSchema};
    use pretty_assertions::assert_eq;

    fn dispatcher() -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "shout",
                "Uppercase a word",
                ToolSchema::new().param(ParamSpec::string("word", "Word").required()),
                |args| {
                    let word = args.str("word").unwrap_or_default();
                    if word.is_empty() {
                        return Err(ToolError::execution("nothing to shout"));
                    }
                    Ok(ToolOutput::Text(word.to_uppercase()))
                },
            )
            .unwrap();
        Dispatcher::new(Arc::new(registry), Implementation::new("test-server", "0.0.1"))
    }

    fn initialized() -> ConnectionState {
        let conn = ConnectionState::new();
        conn.initialized.store(true, Ordering::Release);
        conn
    }

    fn call(d: &Dispatcher, conn: &ConnectionState, params: Value) -> MCPResponse {
        d.handle(
            &CallContext::new(),
            conn,
            MCPRequest::new("1", "tools/call", Some(params)),
        )
        .unwrap()
    }

    fn result_of(response: &MCPResponse) -> CallToolResult {
        serde_json::from_value(response.result.clone().unwrap()).unwrap()
    }

    #[test]
    fn initialize_acknowledges_version_and_server_info() {
        let d = dispatcher();
        let conn = ConnectionState::new();
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "tester", "version": "1.0.0"}
        });
        let response = d
            .handle(&CallContext::new(), &conn, MCPRequest::new(0, "initialize", Some(params)))
            .unwrap();

        let ack: InitializeResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(ack.protocol_version, PROTOCOL_VERSION);
        assert_eq!(ack.server_info, Implementation::new("test-server", "0.0.1"));
        assert!(conn.is_initialized());
        assert_eq!(conn.client().map(|c| c.name.as_str()), Some("tester"));
    }

    #[test]
    fn tool_calls_before_initialize_are_refused() {
        let d = dispatcher();
        let response = call(&d, &ConnectionState::new(), json!({"name": "shout", "arguments": {}}));
        assert_eq!(response.error.unwrap().code, codes::NOT_INITIALIZED);
    }

    #[test]
    fn unknown_tool_is_an_error_result_not_a_protocol_error() {
        let d = dispatcher();
        let response = call(&d, &initialized(), json!({"name": "missing"}));
        assert!(response.error.is_none());
        let result = result_of(&response);
        assert!(result.is_error);
        assert_eq!(result.content, vec![ContentBlock::text("Error: unknown tool: missing")]);
    }

    #[test]
    fn validation_failure_names_parameter() {
        let d = dispatcher();
        let result = result_of(&call(&d, &initialized(), json!({"name": "shout", "arguments": {}})));
        assert!(result.is_error);
        assert_eq!(
            result.content,
            vec![ContentBlock::text("Error: invalid argument 'word': missing required parameter")]
        );
    }

    #[test]
    fn handler_errors_and_successes_are_results() {
        let d = dispatcher();
        let conn = initialized();

        let ok = result_of(&call(&d, &conn, json!({"name": "shout", "arguments": {"word": "hi"}})));
        assert_eq!(ok, CallToolResult::success(vec![ContentBlock::text("HI")]));

        let err = result_of(&call(&d, &conn, json!({"name": "shout", "arguments": {"word": ""}})));
        assert_eq!(err, CallToolResult::error("nothing to shout"));
    }

    #[test]
    fn tools_list_reports_schema() {
        let d = dispatcher();
        let response = d
            .handle(&CallContext::new(), &initialized(), MCPRequest::new(3, "tools/list", None))
            .unwrap();
        let tools = &response.result.unwrap()["tools"];
        assert_eq!(tools[0]["name"], "shout");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["word"]));
    }

    #[test]
    fn notifications_get_no_response() {
        let d = dispatcher();
        let note = MCPRequest::notification("notifications/initialized", None);
        assert!(d.handle(&CallContext::new(), &initialized(), note).is_none());
    }

    #[test]
    fn unknown_method_and_bad_envelope() {
        let d = dispatcher();
        let conn = initialized();
        let response = d
            .handle(&CallContext::new(), &conn, MCPRequest::new(4, "resources/list", None))
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);

        let response = d
            .handle(&CallContext::new(), &conn, MCPRequest::new(5, "tools/call", None))
            .unwrap();
        assert_eq!(response.error.unwrap().code, codes::INVALID_PARAMS);

        let mut old = MCPRequest::new(6, "ping", None);
        old.jsonrpc = "1.0".into();
        let response = d.handle(&CallContext::new(), &conn, old).unwrap();
        assert_eq!(response.error.unwrap().code, codes::INVALID_REQUEST);
    }
}
