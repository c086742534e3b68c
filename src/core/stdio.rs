/// STDIO Transport
///
/// Implements the MCP protocol over standard input/output for compatibility
/// with MCP Inspector and local development. Requests are read line-by-line
/// and each response is written as a single line. All logging goes to stderr
/// to avoid interfering with the JSON-RPC stream.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::core::context::CallContext;
use crate::core::dispatcher::{ConnectionState, Dispatcher};
use crate::core::metrics;
use crate::core::protocol::{MCPRequest, MCPResponse, codes};

/// Run the MCP server on this process's stdin/stdout.
///
/// # Errors
/// Returns the first I/O error on stdin or stdout.
pub async fn run_server_stdio(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    tracing::info!(
        name = %dispatcher.server_info().name,
        version = %dispatcher.server_info().version,
        "MCP server starting (STDIO mode)"
    );

    // 8KB buffers balance memory usage with I/O efficiency
    let stdin = BufReader::with_capacity(8192, tokio::io::stdin());
    let stdout = BufWriter::with_capacity(8192, tokio::io::stdout());
    serve_lines(&dispatcher, stdin, stdout).await
}

/// Serve one line-delimited JSON-RPC connection until the reader hits EOF.
///
/// # Errors
/// Returns the first I/O error; malformed lines are answered, not fatal.
pub async fn serve_lines<R, W>(dispatcher: &Dispatcher, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let span = tracing::info_span!("mcp.stdio.connection", transport = "stdio");
    let ctx = CallContext::new().with_span(span.clone());
    let conn = ConnectionState::new();
    metrics::connection_opened("stdio");

    let result = async {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let response = match serde_json::from_str::<MCPRequest>(&line) {
                Ok(request) => dispatcher.handle(&ctx, &conn, request),
                Err(e) => {
                    tracing::warn!(parent: &span, error = %e, "parse error");
                    // Answer only when an id can be recovered from the line
                    serde_json::from_str::<serde_json::Value>(&line)
                        .ok()
                        .and_then(|partial| partial.get("id").cloned())
                        .map(|id| {
                            MCPResponse::failure(
                                Some(id),
                                codes::PARSE_ERROR,
                                format!("Parse error: {}", e),
                            )
                        })
                }
            };

            let Some(response) = response else {
                continue;
            };
            let json = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(parent: &span, error = %e, "error serializing response");
                    continue;
                }
            };

            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            // Flush after each response for low latency
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    metrics::connection_closed("stdio");
    tracing::info!(parent: &span, "stdio connection closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{CallToolResult, Implementation, PROTOCOL_VERSION};
    use crate::core::registry::ToolRegistry;
    use crate::tools;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let mut registry = ToolRegistry::new();
        tools::register_all(&mut registry).unwrap();
        Dispatcher::new(Arc::new(registry), Implementation::new("stdio-test", "0.0.1"))
    }

    async fn exchange(input: String) -> Vec<serde_json::Value> {
        let mut output = Vec::new();
        serve_lines(&dispatcher(), input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn handshake_then_tool_call() {
        let input = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "inspector", "version": "1"}
            }}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {
                "name": "calculator",
                "arguments": {"operation": "add", "x": 3, "y": 4}
            }}),
        ]
        .iter()
        .map(|v| v.to_string() + "\n")
        .collect::<String>();

        let responses = exchange(input).await;
        assert_eq!(responses.len(), 2, "notification gets no reply");
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);

        let result: CallToolResult =
            serde_json::from_value(responses[1]["result"].clone()).unwrap();
        assert_eq!(responses[1]["id"], 2);
        assert!(!result.is_error);
        assert_eq!(result.content[0], crate::core::protocol::ContentBlock::text("7.00"));
    }

    #[tokio::test]
    async fn malformed_lines_are_answered_when_id_is_recoverable() {
        let input = "\n{\"jsonrpc\":\"2.0\",\"id\":7}\nnot json at all\n".to_string();
        let responses = exchange(input).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["error"]["code"], codes::PARSE_ERROR);
    }
}
