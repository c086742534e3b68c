/// Server-Sent Events Sessions
///
/// Each `GET /sse` opens one session: a channel whose receiving half is the
/// streamed HTTP response body and whose sending half is looked up by session
/// id when the client POSTs a message. Dropping the response stream (client
/// gone, server stopping) tears the session down.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

use crate::core::dispatcher::ConnectionState;
use crate::core::metrics;
use crate::core::protocol::MCPResponse;

/// Path clients POST messages to; the session id goes in the query string.
pub const MESSAGE_PATH: &str = "/message";

const KEEPALIVE_FRAME: &[u8] = b": ping\n\n";

/// Encode one SSE event. Multi-line data becomes several `data:` lines.
pub fn sse_frame(event: &str, data: &str) -> Bytes {
    let mut frame = String::with_capacity(event.len() + data.len() + 16);
    frame.push_str("event: ");
    frame.push_str(event);
    frame.push('\n');
    for line in data.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    Bytes::from(frame)
}

/// Sending side of one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::UnboundedSender<Bytes>,
    state: Arc<ConnectionState>,
    span: Span,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Handshake state shared by every request on this session.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Queue a response on the session stream.
    ///
    /// Returns false if the stream is already gone.
    pub fn send_response(&self, response: &MCPResponse) -> bool {
        match serde_json::to_string(response) {
            Ok(json) => self.tx.send(sse_frame("message", &json)).is_ok(),
            Err(e) => {
                tracing::error!(parent: &self.span, error = %e, "failed to serialize response");
                false
            }
        }
    }
}

/// All live SSE sessions of one server.
#[derive(Debug)]
pub struct SessionHub {
    sessions: DashMap<String, SessionHandle>,
    connected: AtomicUsize,
    keepalive: Duration,
    shutdown: CancellationToken,
}

impl SessionHub {
    /// Each stream sends a comment frame every `keepalive`.
    pub fn new(keepalive: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            connected: AtomicUsize::new(0),
            keepalive,
            shutdown: CancellationToken::new(),
        })
    }

    /// Open a session and return its response stream.
    ///
    /// The first queued event tells the client where to POST messages.
    /// Must be called from within a Tokio runtime (keep-alive task).
    pub fn open(self: &Arc<Self>) -> SessionStream {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let span = tracing::info_span!(
            "mcp.sse.connection",
            session.id = %id,
            transport = "sse",
            endpoint = "/sse",
        );

        let endpoint = format!("{}?sessionId={}", MESSAGE_PATH, id);
        // Cannot fail: the receiver is alive until we return it.
        let _ = tx.send(sse_frame("endpoint", &endpoint));

        self.spawn_keepalive(tx.clone());
        self.sessions.insert(
            id.clone(),
            SessionHandle {
                id: id.clone(),
                tx,
                state: Arc::new(ConnectionState::new()),
                span: span.clone(),
            },
        );

        let connected = self.connected.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::connection_opened("sse");
        tracing::info!(parent: &span, connected, "client connected");

        SessionStream {
            id,
            rx,
            hub: Arc::clone(self),
            span,
        }
    }

    fn spawn_keepalive(&self, tx: mpsc::UnboundedSender<Bytes>) {
        let every = self.keepalive;
        let stop = self.shutdown.child_token();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(Bytes::from_static(KEEPALIVE_FRAME)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Handle for pushing frames to session `id`, while it is connected.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of currently connected sessions.
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// End every session stream.
    ///
    /// Queued responses are still delivered: each stream drains its channel
    /// before finishing.
    pub fn close_all(&self) {
        self.shutdown.cancel();
        let count = self.sessions.len();
        self.sessions.clear();
        tracing::info!(sessions = count, "closing all SSE sessions");
    }
}

/// Receiving side of one session, used as the streamed response body.
#[derive(Debug)]
pub struct SessionStream {
    id: String,
    rx: mpsc::UnboundedReceiver<Bytes>,
    hub: Arc<SessionHub>,
    span: Span,
}

impl SessionStream {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for SessionStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.hub.sessions.remove(&self.id);
        let connected = self.hub.connected.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::connection_closed("sse");
        tracing::info!(parent: &self.span, connected, "client disconnected");
    }
}
