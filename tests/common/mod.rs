#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use mcp_mesh::core::config::ClientConfig;
use mcp_mesh::core::dispatcher::Dispatcher;
use mcp_mesh::core::metrics;
use mcp_mesh::core::protocol::Implementation;
use mcp_mesh::core::registry::{ParamSpec, ToolOutput, ToolRegistry, ToolSchema};
use mcp_mesh::core::server::{AppState, HttpServers};
use mcp_mesh::core::sse::SessionHub;
use mcp_mesh::tools;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Blocks for `millis` before answering; used to hold calls in flight.
pub const SLOW_TOOL: &str = "slow";

pub struct TestServer {
    pub mcp_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub sessions: Arc<SessionHub>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.mcp_addr)
    }

    pub fn metrics_url(&self, path: &str) -> String {
        format!("http://{}{}", self.metrics_addr, path)
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.base_url());
        config.handshake_timeout = Duration::from_secs(5);
        config.close_grace = Duration::from_millis(500);
        config
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.unwrap().unwrap();
        }
    }
}

#[derive(Deserialize)]
struct SlowArgs {
    millis: u64,
}

pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry).unwrap();
    registry
        .register(
            SLOW_TOOL,
            "Sleeps before answering",
            ToolSchema::new().param(ParamSpec::integer("millis", "How long to sleep").required().at_least(0.0)),
            |args| {
                let SlowArgs { millis } = args.parse()?;
                std::thread::sleep(Duration::from_millis(millis));
                Ok(ToolOutput::Text(format!("slept {}", millis)))
            },
        )
        .unwrap();
    registry
}

pub async fn spawn_server() -> TestServer {
    spawn_server_with(test_registry()).await
}

pub async fn spawn_server_with(registry: ToolRegistry) -> TestServer {
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(registry),
        Implementation::new("test-server", "0.0.1"),
    ));
    let sessions = SessionHub::new(Duration::from_secs(1));
    let mut state = AppState::new(dispatcher, Arc::clone(&sessions));
    if let Ok(handle) = metrics::install_prometheus() {
        state = state.with_prometheus(handle);
    }

    let mcp = TcpListener::bind("127.0.0.1:0").unwrap();
    let observability = TcpListener::bind("127.0.0.1:0").unwrap();
    let servers = HttpServers::bind(state, mcp, observability, 2, Duration::from_secs(2)).unwrap();
    let mcp_addr = servers.mcp_addr();
    let metrics_addr = servers.metrics_addr();

    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(servers.serve(async {
        let _ = rx.await;
    }));

    TestServer {
        mcp_addr,
        metrics_addr,
        sessions,
        shutdown: Some(tx),
        task: Some(task),
    }
}
