/// Demo client: two independent periodic workloads over one shared session.
///
/// - dice: every 500ms roll two dice and add them through `calculator`
/// - echo: every 2s round-trip a message through `echo`
///
/// Runs until Ctrl-C, then closes the session with its grace period.
///
/// Environment Variables:
/// - MCP_SERVER_URL: server base URL (default: "http://localhost:8184")
/// - MCP_CALL_TIMEOUT_MS: per-call deadline (default: 3000)
/// - LOG_FORMAT: "text" or "json" (default: "text")

use std::time::Duration;

use mcp_mesh::client::SharedSession;
use mcp_mesh::client::tools::{call_echo, roll_dice, sum_dice};
use mcp_mesh::core::config::{ClientConfig, LogFormat, get_env_var};
use mcp_mesh::core::context::CallContext;
use mcp_mesh::core::telemetry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(e) = telemetry::init_tracing(LogFormat::from_env()) {
        eprintln!("failed to initialize logging: {}", e);
    }

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let call_timeout = match get_env_var("MCP_CALL_TIMEOUT_MS", "3000").parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(e) => {
            tracing::error!(error = %e, "invalid MCP_CALL_TIMEOUT_MS");
            std::process::exit(1);
        }
    };

    tracing::info!(server = %config.base_url, "starting demo workloads");
    let session = SharedSession::init_global(config);
    let stop = CancellationToken::new();

    let dice = tokio::spawn(every(Duration::from_millis(500), stop.clone(), move || async move {
        let ctx = CallContext::new().with_timeout(call_timeout);
        let (d1, d2) = roll_dice();
        sum_dice(session, &ctx, d1, d2).await;
    }));

    let echo = tokio::spawn(every(Duration::from_secs(2), stop.clone(), move || async move {
        let ctx = CallContext::new().with_timeout(call_timeout);
        let message = format!("hello at {}", chrono::Utc::now().to_rfc3339());
        match call_echo(session, &ctx, &message).await {
            Ok(reply) => tracing::info!(%reply, "echo"),
            Err(e) => tracing::warn!(error = %e, "echo failed"),
        }
    }));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
    }
    tracing::info!("shutting down");
    stop.cancel();
    let _ = tokio::join!(dice, echo);
    session.close().await;
}

/// Run `job` on a fixed period until `stop` fires.
async fn every<F, Fut>(period: Duration, stop: CancellationToken, job: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => job().await,
        }
    }
}
