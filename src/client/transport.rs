/// Client Session Transport
///
/// One `Connection` owns one SSE stream. A single reader task routes each
/// `message` event to the waiter registered under its correlation id;
/// requests are POSTed to the endpoint the server announced when the
/// stream opened.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use reqwest::{Url, header};
use serde_json::{Value, json};
use tokio::sync::{Notify, oneshot};
use tokio_util::sync::CancellationToken;

use crate::client::sse::{SseEvent, SseParser};
use crate::core::config::ClientConfig;
use crate::core::error::{ClientError, HandshakeError};
use crate::core::protocol::{
    Arguments, CallToolResult, Implementation, InitializeParams, InitializeResult, MCPRequest,
    MCPResponse, MCPTool,
};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Waiters for in-flight requests, keyed by correlation id.
#[derive(Debug, Default)]
struct Pending {
    waiters: DashMap<String, oneshot::Sender<MCPResponse>>,
    drained: Notify,
    lost_reason: Mutex<Option<String>>,
    lost: CancellationToken,
}

impl Pending {
    fn complete(&self, response: MCPResponse) {
        let Some(key) = response.correlation_key() else {
            tracing::debug!("ignoring response without id");
            return;
        };
        match self.waiters.remove(&key) {
            Some((_, waiter)) => {
                // The waiter may have been cancelled in the meantime
                let _ = waiter.send(response);
            }
            None => tracing::warn!(correlation_id = %key, "dropping unmatched response"),
        }
    }

    /// Fail every waiter. Later requests see `lost` and do not register.
    fn fail_all(&self, reason: String) {
        if let Ok(mut slot) = self.lost_reason.lock() {
            slot.get_or_insert(reason);
        }
        self.lost.cancel();
        self.waiters.clear();
        self.drained.notify_waiters();
    }

    fn reason(&self) -> String {
        self.lost_reason
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or_else(|| "stream ended".to_string())
    }
}

/// Removes its pending entry when the request finishes or is dropped.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.waiters.remove(&self.id);
        if self.pending.waiters.is_empty() {
            self.pending.drained.notify_waiters();
        }
    }
}

/// An established, initialized session connection.
#[derive(Debug)]
pub struct Connection {
    http: reqwest::Client,
    message_url: Url,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    closing: AtomicBool,
    stop: CancellationToken,
    server_info: Implementation,
}

impl Connection {
    /// Open the SSE stream and complete the `initialize` handshake, all
    /// within `config.handshake_timeout`.
    ///
    /// # Errors
    /// Any failure to connect, a rejected or malformed handshake, a
    /// protocol version mismatch, or the timeout.
    pub async fn establish(config: &ClientConfig) -> Result<Self, HandshakeError> {
        let timeout = config.handshake_timeout;
        match tokio::time::timeout(timeout, Self::connect_and_initialize(config)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeError::Timeout(timeout)),
        }
    }

    async fn connect_and_initialize(config: &ClientConfig) -> Result<Self, HandshakeError> {
        let mut connection = Self::open(config).await?;
        connection.server_info = connection.initialize(config).await?;
        tracing::info!(
            server = %connection.server_info.name,
            server_version = %connection.server_info.version,
            "MCP session established"
        );
        Ok(connection)
    }

    async fn open(config: &ClientConfig) -> Result<Self, HandshakeError> {
        let sse_url = config.sse_url();
        let connect_err = |reason: String| HandshakeError::Connect {
            url: sse_url.clone(),
            reason,
        };

        let base = Url::parse(&sse_url).map_err(|e| connect_err(e.to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| connect_err(e.to_string()))?;

        let response = http
            .get(base.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(connect_err(format!("server answered {}", response.status())));
        }

        let mut stream: ByteStream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();
        let (endpoint, backlog) = read_endpoint(&mut stream, &mut parser)
            .await
            .map_err(connect_err)?;
        let message_url = base
            .join(&endpoint)
            .map_err(|e| HandshakeError::Protocol(format!("bad endpoint '{}': {}", endpoint, e)))?;
        tracing::debug!(%message_url, "received message endpoint");

        let pending = Arc::new(Pending::default());
        for event in backlog {
            route(&pending, event);
        }

        let stop = CancellationToken::new();
        tokio::spawn(read_events(stream, parser, Arc::clone(&pending), stop.clone()));

        Ok(Self {
            http,
            message_url,
            pending,
            next_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
            stop,
            server_info: Implementation::new("", ""),
        })
    }

    async fn initialize(&self, config: &ClientConfig) -> Result<Implementation, HandshakeError> {
        let params = InitializeParams {
            protocol_version: config.protocol_version.clone(),
            capabilities: json!({}),
            client_info: config.client_info.clone(),
        };
        let params = serde_json::to_value(&params).map_err(|e| HandshakeError::Protocol(e.to_string()))?;

        let result = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| match e {
                ClientError::Rpc { message, .. } => HandshakeError::Rejected(message),
                other => HandshakeError::Protocol(other.to_string()),
            })?;
        let ack: InitializeResult =
            serde_json::from_value(result).map_err(|e| HandshakeError::Protocol(e.to_string()))?;

        if ack.protocol_version != config.protocol_version {
            return Err(HandshakeError::VersionMismatch {
                requested: config.protocol_version.clone(),
                negotiated: ack.protocol_version,
            });
        }

        self.notify("notifications/initialized", None)
            .await
            .map_err(|e| HandshakeError::Protocol(e.to_string()))?;
        Ok(ack.server_info)
    }

    /// Who answered `initialize`.
    pub fn server_info(&self) -> &Implementation {
        &self.server_info
    }

    /// Resolves once the stream is gone.
    pub fn lost(&self) -> CancellationToken {
        self.pending.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.pending.lost.is_cancelled()
    }

    /// Why the stream ended, or "stream ended" when no reason was recorded.
    pub fn lost_reason(&self) -> String {
        self.pending.reason()
    }

    /// Number of requests awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.waiters.len()
    }

    /// Send a request and wait for its correlated response.
    ///
    /// Dropping the returned future withdraws the request's waiter; a late
    /// response is then discarded by the reader.
    ///
    /// # Errors
    /// `Closed` after `close`, `ConnectionLost` once the stream is gone,
    /// `Transport` if the POST fails, `Rpc` for a JSON-RPC error.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.waiters.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };
        if self.is_lost() {
            return Err(ClientError::ConnectionLost(self.lost_reason()));
        }

        tracing::debug!(correlation_id = %id, method, "sending request");
        self.post(&MCPRequest::new(id, method, params)).await?;

        let response = rx
            .await
            .map_err(|_| ClientError::ConnectionLost(self.lost_reason()))?;
        if let Some(error) = response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| ClientError::Protocol("response has neither result nor error".to_string()))
    }

    /// Send a one-way notification.
    ///
    /// # Errors
    /// `Transport` if the POST fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.post(&MCPRequest::notification(method, params)).await
    }

    async fn post(&self, message: &MCPRequest) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.message_url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("server answered {}", status)));
        }
        Ok(())
    }

    /// # Errors
    /// Request errors, or `Protocol` if the result is not a tool result.
    pub async fn call_tool(&self, name: &str, arguments: Arguments) -> Result<CallToolResult, ClientError> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        serde_json::from_value(result).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// # Errors
    /// Request errors, or `Protocol` if the tool list is malformed.
    pub async fn list_tools(&self) -> Result<Vec<MCPTool>, ClientError> {
        let mut result = self.request("tools/list", None).await?;
        let tools = result
            .get_mut("tools")
            .map(Value::take)
            .ok_or_else(|| ClientError::Protocol("missing 'tools'".to_string()))?;
        serde_json::from_value(tools).map_err(|e| ClientError::Protocol(e.to_string()))
    }

    /// Refuse new requests, wait up to `grace` for in-flight ones, then stop
    /// the reader. Waiters still pending after the grace period fail.
    pub async fn close(&self, grace: Duration) {
        self.closing.store(true, Ordering::SeqCst);

        let drained = async {
            loop {
                let notified = self.pending.drained.notified();
                if self.pending.waiters.is_empty() || self.is_lost() {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            tracing::warn!(in_flight = self.in_flight(), ?grace, "closing with requests in flight");
        }

        self.stop.cancel();
        self.pending.fail_all("session closed".to_string());
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Read until the `endpoint` event; events after it in the same chunk are
/// returned for routing.
async fn read_endpoint(
    stream: &mut ByteStream,
    parser: &mut SseParser,
) -> Result<(String, Vec<SseEvent>), String> {
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        let mut events = parser.feed(&chunk).into_iter();
        while let Some(event) = events.next() {
            if event.event == "endpoint" {
                return Ok((event.data, events.collect()));
            }
            tracing::debug!(event = %event.event, "event before endpoint ignored");
        }
    }
    Err("stream ended before endpoint event".to_string())
}

fn route(pending: &Pending, event: SseEvent) {
    if event.event != "message" {
        tracing::debug!(event = %event.event, "ignoring event");
        return;
    }
    match serde_json::from_str::<MCPResponse>(&event.data) {
        Ok(response) => pending.complete(response),
        Err(e) => tracing::warn!(error = %e, "undecodable message event"),
    }
}

async fn read_events(
    mut stream: ByteStream,
    mut parser: SseParser,
    pending: Arc<Pending>,
    stop: CancellationToken,
) {
    let reason = loop {
        tokio::select! {
            _ = stop.cancelled() => break "session closed".to_string(),
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.feed(&bytes) {
                        route(&pending, event);
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "stream ended".to_string(),
            },
        }
    };

    if !stop.is_cancelled() {
        tracing::warn!(%reason, in_flight = pending.waiters.len(), "SSE stream lost");
    }
    pending.fail_all(reason);
}
