mod common;

use mcp_mesh::client::SharedSession;
use mcp_mesh::client::tools::call_calculator;
use mcp_mesh::core::context::CallContext;
use mcp_mesh::core::registry::ToolRegistry;
use mcp_mesh::core::error::RegistryError;
use mcp_mesh::tools::calculator::{self, Operation};
use serde_json::Value;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metrics_and_health_reflect_tool_traffic() {
    let server = common::spawn_server().await;
    let session = SharedSession::new(server.client_config());
    let ctx = CallContext::new();

    call_calculator(&session, &ctx, Operation::Add, 1.0, 2.0).await.unwrap();
    let _ = call_calculator(&session, &ctx, Operation::Divide, 1.0, 0.0).await;

    let http = reqwest::Client::new();
    let health: Value = http
        .get(server.metrics_url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["connected_clients"], 1);

    let mcp_health: Value = http
        .get(format!("{}/health", server.base_url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mcp_health["service"], "test-server");

    let exposition = http
        .get(server.metrics_url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(exposition.contains("mcp_tool_calls_total"), "{}", exposition);
    assert!(exposition.contains("tool_name=\"calculator\""), "{}", exposition);
    assert!(exposition.contains("status=\"error\""), "{}", exposition);
    assert!(exposition.contains("mcp_tool_call_duration_seconds"), "{}", exposition);
    assert!(exposition.contains("mcp_client_calls_total"), "{}", exposition);

    session.close().await;
    server.stop().await;
}

#[test]
fn duplicate_registration_keeps_the_first_tool() {
    let mut registry = common::test_registry();
    let before = registry.len();
    let err = calculator::register(&mut registry).unwrap_err();
    assert_eq!(err, RegistryError::DuplicateTool("calculator".into()));
    assert_eq!(registry.len(), before);
    assert!(registry.lookup("calculator").is_ok());

    let empty = ToolRegistry::new();
    assert!(empty.lookup("calculator").is_err());
}
