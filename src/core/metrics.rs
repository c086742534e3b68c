/// Prometheus Metrics
///
/// Thin recording helpers over the `metrics` facade. The exporter is
/// installed once per process by `install_prometheus`; until then every
/// recording call is a no-op.

use std::sync::Mutex;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub const CONNECTED_CLIENTS: &str = "mcp_connected_clients";
pub const TOOL_CALLS_TOTAL: &str = "mcp_tool_calls_total";
pub const TOOL_CALL_DURATION: &str = "mcp_tool_call_duration_seconds";
pub const UNKNOWN_TOOL_CALLS_TOTAL: &str = "mcp_unknown_tool_calls_total";
pub const CLIENT_CALLS_TOTAL: &str = "mcp_client_calls_total";
pub const CLIENT_CALL_DURATION: &str = "mcp_client_call_duration_seconds";
pub const CLIENT_HANDSHAKES_TOTAL: &str = "mcp_client_handshakes_total";

const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Install the global Prometheus recorder, or return the one already
/// installed by an earlier call.
///
/// # Errors
/// Fails if another metrics recorder was installed outside this function.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let mut slot = HANDLE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)?
        .install_recorder()?;
    describe();
    *slot = Some(handle.clone());
    Ok(handle)
}

/// Periodically drain histogram samples into their buckets.
pub fn spawn_upkeep(handle: PrometheusHandle, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}

fn describe() {
    describe_gauge!(CONNECTED_CLIENTS, "Number of connected MCP clients");
    describe_counter!(TOOL_CALLS_TOTAL, "Total number of tool calls");
    describe_histogram!(TOOL_CALL_DURATION, "Duration of tool calls");
    describe_counter!(UNKNOWN_TOOL_CALLS_TOTAL, "Calls naming an unregistered tool");
    describe_counter!(CLIENT_CALLS_TOTAL, "Tool calls issued by the shared client session");
    describe_histogram!(CLIENT_CALL_DURATION, "Client-observed tool call latency");
    describe_counter!(CLIENT_HANDSHAKES_TOTAL, "Client handshake attempts");
}

/// Record one dispatched call of a registered tool.
pub fn record_tool_call(tool_name: &str, success: bool, elapsed: Duration) {
    let status = if success { "success" } else { "error" };
    counter!(
        TOOL_CALLS_TOTAL,
        "tool_name" => tool_name.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(TOOL_CALL_DURATION, "tool_name" => tool_name.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_unknown_tool() {
    counter!(UNKNOWN_TOOL_CALLS_TOTAL).increment(1);
}

pub fn connection_opened(transport: &'static str) {
    gauge!(CONNECTED_CLIENTS, "transport" => transport).increment(1.0);
}

pub fn connection_closed(transport: &'static str) {
    gauge!(CONNECTED_CLIENTS, "transport" => transport).decrement(1.0);
}

/// Record one call issued by the client; `status` is success, error or
/// cancelled.
pub fn record_client_call(tool_name: &str, status: &'static str, elapsed: Duration) {
    counter!(
        CLIENT_CALLS_TOTAL,
        "tool_name" => tool_name.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(CLIENT_CALL_DURATION, "tool_name" => tool_name.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_handshake(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(CLIENT_HANDSHAKES_TOTAL, "status" => status).increment(1);
}
