/// MCP Server Implementation
///
/// This module wires the dispatcher to HTTP with Actix Web:
/// - the MCP listener: `GET /sse` opens a session stream, `POST /message`
///   carries JSON-RPC messages for that session, `GET /health` for liveness
/// - the observability listener: `/metrics`, `/health`, `/status`
/// - startup, graceful shutdown, and the combined STDIO + HTTP mode

use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{
    App, HttpResponse, HttpServer,
    dev::Server,
    http::header,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::config::{ServerConfig, TransportMode};
use crate::core::context::CallContext;
use crate::core::dispatcher::Dispatcher;
use crate::core::error::RegistryError;
use crate::core::protocol::{MCPRequest, MCPResponse, codes};
use crate::core::registry::ToolRegistry;
use crate::core::sse::{MESSAGE_PATH, SessionHub};
use crate::core::{metrics, stdio};
use crate::tools;

/// Application state shared across all worker threads.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionHub>,
    /// Renders `/metrics`; absent when no recorder is installed
    pub prometheus: Option<PrometheusHandle>,
    /// Public SSE URL reported by `/status`
    pub sse_endpoint: String,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, sessions: Arc<SessionHub>) -> Self {
        Self {
            dispatcher,
            sessions,
            prometheus: None,
            sse_endpoint: String::new(),
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub fn with_sse_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sse_endpoint = endpoint.into();
        self
    }

    fn server_name(&self) -> &str {
        &self.dispatcher.server_info().name
    }

    fn server_version(&self) -> &str {
        &self.dispatcher.server_info().version
    }
}

/// Initialize and register all tools.
///
/// Registration completes here, before any listener exists; the returned
/// registry is frozen behind an `Arc`.
///
/// # Errors
/// Fails if two tools share a name.
pub fn initialize_tools() -> Result<Arc<ToolRegistry>, RegistryError> {
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry)?;
    tracing::info!(tools = ?registry.names().collect::<Vec<_>>(), "MCP tools registered successfully");
    Ok(Arc::new(registry))
}

/// Routes of the MCP listener.
pub fn mcp_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/sse", web::get().to(sse_connect))
        .route(MESSAGE_PATH, web::post().to(post_message))
        .route("/health", web::get().to(health));
}

/// Routes of the observability listener.
pub fn observability_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health))
        .route("/status", web::get().to(status));
}

/// Open a session and stream its events.
async fn sse_connect(state: web::Data<AppState>) -> HttpResponse {
    if state.sessions.is_closing() {
        return HttpResponse::ServiceUnavailable().json(json!({ "error": "server shutting down" }));
    }

    let stream = state.sessions.open();
    HttpResponse::Ok()
        .content_type("text/event-stream")
        // Disable caching to ensure clients always get fresh data
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable nginx buffering for real-time streaming
        .insert_header(("x-accel-buffering", "no"))
        .streaming(stream)
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// Accept one JSON-RPC message for a session.
///
/// The response, if any, is queued on the session stream before the POST
/// is acknowledged with `202 Accepted`.
async fn post_message(
    state: web::Data<AppState>,
    query: web::Query<MessageQuery>,
    body: web::Bytes,
) -> HttpResponse {
    let Some(session) = state.sessions.get(&query.session_id) else {
        return HttpResponse::NotFound().json(json!({ "error": "unknown session" }));
    };

    let request: MCPRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(parent: session.span(), error = %e, "undecodable message");
            let id = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|partial| partial.get("id").cloned());
            if let Some(id) = id {
                session.send_response(&MCPResponse::failure(
                    Some(id),
                    codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
            return HttpResponse::BadRequest().json(json!({ "error": format!("Parse error: {}", e) }));
        }
    };

    // Tool handlers are synchronous; keep them off the worker driving the streams
    let dispatcher = Arc::clone(&state.dispatcher);
    let blocking_session = session.clone();
    let dispatched = web::block(move || {
        let ctx = CallContext::new().with_span(blocking_session.span().clone());
        dispatcher.handle(&ctx, blocking_session.state(), request)
    })
    .await;

    match dispatched {
        Ok(Some(response)) => {
            if !session.send_response(&response) {
                return HttpResponse::Gone().json(json!({ "error": "session closed" }));
            }
            HttpResponse::Accepted().finish()
        }
        Ok(None) => HttpResponse::Accepted().finish(),
        Err(e) => {
            tracing::error!(parent: session.span(), error = %e, "dispatch failed");
            HttpResponse::InternalServerError().json(json!({ "error": "dispatch failed" }))
        }
    }
}

/// Health check endpoint handler.
///
/// Reports liveness and the number of currently connected sessions.
async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": state.server_name(),
        "version": state.server_version(),
        "connected_clients": state.sessions.connected(),
    }))
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "server": state.server_name(),
        "version": state.server_version(),
        "connected_clients": state.sessions.connected(),
        "transport": "sse",
        "endpoint": state.sse_endpoint,
        "tools": state.dispatcher.registry().len(),
    }))
}

/// Prometheus scrape endpoint.
async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    match &state.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

/// The two HTTP listeners of a running server.
pub struct HttpServers {
    mcp: Server,
    observability: Server,
    mcp_addr: SocketAddr,
    metrics_addr: SocketAddr,
    sessions: Arc<SessionHub>,
    grace: Duration,
}

impl HttpServers {
    /// Build both listeners on already-bound sockets.
    ///
    /// # Errors
    /// Fails if a listener cannot be adopted by Actix.
    pub fn bind(
        state: AppState,
        mcp_listener: TcpListener,
        metrics_listener: TcpListener,
        workers: usize,
        grace: Duration,
    ) -> std::io::Result<Self> {
        let mcp_addr = mcp_listener.local_addr()?;
        let metrics_addr = metrics_listener.local_addr()?;
        let sessions = Arc::clone(&state.sessions);
        let shutdown_secs = grace.as_secs().max(1);
        let data = web::Data::new(state);

        let mcp_data = data.clone();
        let mcp = HttpServer::new(move || {
            App::new()
                .app_data(mcp_data.clone())
                // Add security headers to all responses
                .wrap(
                    DefaultHeaders::new()
                        .add(("X-Content-Type-Options", "nosniff"))
                        .add(("X-Frame-Options", "DENY")),
                )
                // %r = request line, %s = status, %Dms = duration in milliseconds
                .wrap(Logger::new("%r %s %Dms"))
                .configure(mcp_routes)
        })
        .workers(workers)
        .max_connections(10000)
        // SSE streams are long-lived; only idle keep-alive sockets time out
        .keep_alive(Duration::from_secs(30))
        .client_request_timeout(Duration::from_secs(30))
        .client_disconnect_timeout(Duration::from_secs(2))
        .shutdown_timeout(shutdown_secs)
        .disable_signals()
        .listen(mcp_listener)?
        .run();

        let observability = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                // Enable compression for JSON responses (gzip)
                .wrap(Compress::default())
                .wrap(Logger::new("%r %s %Dms"))
                .configure(observability_routes)
        })
        .workers(1)
        .shutdown_timeout(shutdown_secs)
        .disable_signals()
        .listen(metrics_listener)?
        .run();

        Ok(Self {
            mcp,
            observability,
            mcp_addr,
            metrics_addr,
            sessions,
            grace,
        })
    }

    pub fn mcp_addr(&self) -> SocketAddr {
        self.mcp_addr
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    /// Serve until `shutdown` resolves, then close every session and stop
    /// both listeners within the grace period.
    ///
    /// # Errors
    /// Returns a listener's error if it stops on its own.
    pub async fn serve<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let mcp_handle = self.mcp.handle();
        let observability_handle = self.observability.handle();
        let mut mcp_task = tokio::spawn(self.mcp);
        let mut observability_task = tokio::spawn(self.observability);

        let early = tokio::select! {
            _ = shutdown => None,
            joined = &mut mcp_task => Some(("mcp", joined)),
            joined = &mut observability_task => Some(("observability", joined)),
        };

        if let Some((listener, joined)) = early {
            tracing::error!(listener, "listener stopped unexpectedly");
            self.sessions.close_all();
            mcp_handle.stop(false).await;
            observability_handle.stop(false).await;
            return match joined {
                Ok(result) => result,
                Err(e) => Err(std::io::Error::other(e)),
            };
        }

        tracing::info!("Shutting down SSE server...");
        self.sessions.close_all();
        let graceful = async {
            tokio::join!(mcp_handle.stop(true), observability_handle.stop(true));
        };
        if tokio::time::timeout(self.grace, graceful).await.is_err() {
            tracing::warn!(grace = ?self.grace, "SSE server forced to shutdown");
            mcp_handle.stop(false).await;
            observability_handle.stop(false).await;
        }
        tracing::info!("MCP server exiting");
        Ok(())
    }
}

/// Run the MCP server in HTTP mode until `shutdown` resolves.
///
/// # Errors
/// Fails if a listener cannot be bound or stops unexpectedly.
pub async fn run_server_http<F>(
    config: &ServerConfig,
    dispatcher: Arc<Dispatcher>,
    prometheus: Option<PrometheusHandle>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let sessions = SessionHub::new(config.keepalive);
    let mut state = AppState::new(dispatcher, sessions)
        .with_sse_endpoint(format!("http://localhost:{}/sse", config.mcp_port));
    if let Some(handle) = prometheus {
        state = state.with_prometheus(handle);
    }

    let mcp_listener = TcpListener::bind(config.mcp_bind_addr())?;
    let metrics_listener = TcpListener::bind(config.metrics_bind_addr())?;
    let servers = HttpServers::bind(
        state,
        mcp_listener,
        metrics_listener,
        config.workers,
        config.shutdown_grace,
    )?;

    tracing::info!(
        name = %config.name,
        version = %config.version,
        mcp_addr = %servers.mcp_addr(),
        metrics_addr = %servers.metrics_addr(),
        workers = config.workers,
        "MCP server starting (HTTP/SSE mode)"
    );
    servers.serve(shutdown).await
}

/// Run the transports selected in `config` until Ctrl-C.
///
/// # Errors
/// Returns the first transport error.
pub async fn run(config: ServerConfig, prometheus: Option<PrometheusHandle>) -> std::io::Result<()> {
    let registry = initialize_tools().map_err(std::io::Error::other)?;
    let dispatcher = Arc::new(Dispatcher::new(registry, config.server_info()));

    if let Some(handle) = &prometheus {
        metrics::spawn_upkeep(handle.clone(), Duration::from_secs(5));
    }

    match config.transport {
        TransportMode::Stdio => stdio::run_server_stdio(dispatcher).await,
        TransportMode::Http => run_server_http(&config, dispatcher, prometheus, ctrl_c()).await,
        TransportMode::Both => {
            // STDIO in the background so MCP Inspector can attach while the
            // HTTP endpoints stay available
            let stdio_dispatcher = Arc::clone(&dispatcher);
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = stdio::run_server_stdio(stdio_dispatcher).await {
                    tracing::error!(error = %e, "STDIO server error");
                }
            });

            let http_result = run_server_http(&config, dispatcher, prometheus, ctrl_c()).await;
            stdio_handle.abort();
            http_result
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
