/// Shared Client Session
///
/// One session per process, established on first use. The state lives in a
/// `watch` channel so that the transition into `Ready` or `Failed` is
/// published to every waiter at once:
///
/// ```text
/// Uninitialized --first call--> Initializing --handshake ok--> Ready
///                                            --handshake err-> Failed
/// Ready --stream lost--> Failed        Failed --reset()--> Uninitialized
/// Ready --close()--> Uninitialized
/// ```
///
/// Exactly one caller claims the `Uninitialized -> Initializing` edge and
/// spawns the initializer; everyone else waits on the same channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::client::decode::{self, FromToolResult};
use crate::client::transport::Connection;
use crate::core::config::ClientConfig;
use crate::core::context::CallContext;
use crate::core::error::{ClientError, HandshakeError};
use crate::core::metrics;
use crate::core::protocol::{Arguments, CallToolResult, MCPTool};

static GLOBAL: OnceLock<SharedSession> = OnceLock::new();

/// Observable lifecycle state of a [`SharedSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

#[derive(Debug, Clone)]
enum Slot {
    Uninitialized,
    Initializing,
    Ready(Arc<Connection>),
    Failed(ClientError),
}

impl Slot {
    fn state(&self) -> SessionState {
        match self {
            Slot::Uninitialized => SessionState::Uninitialized,
            Slot::Initializing => SessionState::Initializing,
            Slot::Ready(_) => SessionState::Ready,
            Slot::Failed(_) => SessionState::Failed,
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    slot: watch::Sender<Slot>,
    handshake_attempts: AtomicU64,
    dropped: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dropped.cancel();
    }
}

/// Cheaply cloneable handle to one shared session.
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Inner>,
}

impl SharedSession {
    pub fn new(config: ClientConfig) -> Self {
        let (slot, _) = watch::channel(Slot::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                config,
                slot,
                handshake_attempts: AtomicU64::new(0),
                dropped: CancellationToken::new(),
            }),
        }
    }

    /// Install `config` as the process-wide session unless one exists.
    pub fn init_global(config: ClientConfig) -> &'static SharedSession {
        let mut installed = false;
        let session = GLOBAL.get_or_init(|| {
            installed = true;
            SharedSession::new(config)
        });
        if !installed {
            tracing::warn!("global session already initialized; ignoring new configuration");
        }
        session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.slot.borrow().state()
    }

    /// Handshake attempts made so far, retries included.
    pub fn handshake_attempts(&self) -> u64 {
        self.inner.handshake_attempts.load(Ordering::SeqCst)
    }

    /// The error a `Failed` session reports to every caller.
    pub fn failure(&self) -> Option<ClientError> {
        match &*self.inner.slot.borrow() {
            Slot::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Leave `Failed` so the next call initializes afresh.
    ///
    /// Returns false, changing nothing, in any other state.
    pub fn reset(&self) -> bool {
        let reset = self.inner.slot.send_if_modified(|slot| {
            if matches!(slot, Slot::Failed(_)) {
                *slot = Slot::Uninitialized;
                true
            } else {
                false
            }
        });
        if reset {
            tracing::info!("client session reset");
        }
        reset
    }

    /// Tear down a `Ready` session, letting in-flight calls finish within
    /// the configured grace period. The next call starts a new session.
    pub async fn close(&self) {
        let mut taken = None;
        self.inner.slot.send_if_modified(|slot| {
            if let Slot::Ready(conn) = slot {
                taken = Some(Arc::clone(conn));
                *slot = Slot::Uninitialized;
                true
            } else {
                false
            }
        });
        if let Some(conn) = taken {
            conn.close(self.inner.config.close_grace).await;
            tracing::info!("client session closed");
        }
    }

    /// Wait for a `Ready` connection, initializing the session if this is
    /// the first caller.
    async fn connection(&self) -> Result<Arc<Connection>, ClientError> {
        let mut rx = self.inner.slot.subscribe();
        loop {
            let claimed = self.inner.slot.send_if_modified(|slot| {
                if matches!(slot, Slot::Uninitialized) {
                    *slot = Slot::Initializing;
                    true
                } else {
                    false
                }
            });
            if claimed {
                spawn_initializer(Arc::clone(&self.inner));
            }

            let settled = rx
                .wait_for(|slot| !matches!(slot, Slot::Initializing))
                .await
                .map_err(|_| ClientError::Closed)?
                .clone();
            match settled {
                Slot::Ready(conn) => return Ok(conn),
                Slot::Failed(e) => return Err(e),
                // Closed while we waited; claim again
                Slot::Uninitialized | Slot::Initializing => continue,
            }
        }
    }

    /// Invoke `name` on the server within `ctx`.
    ///
    /// Tool failures come back as results with `is_error` set; only session,
    /// transport and cancellation failures are errors here.
    ///
    /// # Errors
    /// The sticky initialization error while `Failed`, `Cancelled` when `ctx`
    /// is cancelled or expires first, or a transport failure.
    pub async fn call_tool(
        &self,
        ctx: &CallContext,
        name: &str,
        arguments: Arguments,
    ) -> Result<CallToolResult, ClientError> {
        let span = tracing::info_span!(parent: ctx.span(), "mcp.client.call_tool", mcp.tool = %name);
        let started = Instant::now();

        let result = ctx
            .run(async {
                let conn = self.connection().await?;
                conn.call_tool(name, arguments).await
            })
            .instrument(span.clone())
            .await;

        let status = match &result {
            Ok(r) if !r.is_error => "success",
            Err(e) if e.is_cancellation() => "cancelled",
            _ => "error",
        };
        metrics::record_client_call(name, status, started.elapsed());
        if let Err(e) = &result {
            tracing::warn!(parent: &span, error = %e, "tool call failed");
        }
        result
    }

    /// Call a tool and decode its successful result as `T`.
    ///
    /// # Errors
    /// As [`call_tool`](Self::call_tool), plus `Tool` for an error result and
    /// `ResultParse` when the payload is not a `T`.
    pub async fn call_tool_as<T: FromToolResult>(
        &self,
        ctx: &CallContext,
        name: &str,
        arguments: Arguments,
    ) -> Result<T, ClientError> {
        let result = decode::ensure_success(self.call_tool(ctx, name, arguments).await?)?;
        T::from_tool_result(&result)
    }

    /// # Errors
    /// As [`call_tool`](Self::call_tool).
    pub async fn list_tools(&self, ctx: &CallContext) -> Result<Vec<MCPTool>, ClientError> {
        ctx.run(async {
            let conn = self.connection().await?;
            conn.list_tools().await
        })
        .await
    }
}

fn spawn_initializer(inner: Arc<Inner>) {
    tokio::spawn(async move {
        match establish(&inner).await {
            Ok(conn) => {
                let conn = Arc::new(conn);
                inner.slot.send_replace(Slot::Ready(Arc::clone(&conn)));
                // Ready must be visible before the watcher can observe a loss
                watch_connection(&inner, &conn);
            }
            Err(e) => {
                tracing::error!(error = %e, "client session initialization failed");
                inner.slot.send_replace(Slot::Failed(ClientError::Handshake(e)));
            }
        }
    });
}

/// One initialization: the first attempt plus `handshake_retries` retries
/// of retryable failures, backing off exponentially.
async fn establish(inner: &Inner) -> Result<Connection, HandshakeError> {
    let config = &inner.config;
    let mut delay = config.retry_backoff;
    let mut attempt: u32 = 0;

    loop {
        inner.handshake_attempts.fetch_add(1, Ordering::SeqCst);
        let span = tracing::info_span!(
            "mcp.client.handshake",
            attempt,
            url = %config.sse_url(),
        );
        let result = Connection::establish(config).instrument(span).await;
        metrics::record_handshake(result.is_ok());

        match result {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < config.handshake_retries && retryable(&e) => {
                tracing::warn!(error = %e, attempt, ?delay, "handshake failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2).min(Duration::from_secs(30));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn retryable(error: &HandshakeError) -> bool {
    matches!(error, HandshakeError::Connect { .. } | HandshakeError::Timeout(_))
}

/// Move the session to `Failed` when `conn`'s stream is lost while it is
/// still the session's connection.
///
/// The watcher holds neither the session nor the connection, so dropping
/// the last `SharedSession` tears the connection down and ends the watcher.
fn watch_connection(inner: &Arc<Inner>, conn: &Arc<Connection>) {
    let lost = conn.lost();
    let dropped = inner.dropped.clone();
    let session = Arc::downgrade(inner);
    let watched = Arc::downgrade(conn);
    tokio::spawn(async move {
        tokio::select! {
            _ = dropped.cancelled() => return,
            _ = lost.cancelled() => {}
        }
        let (Some(inner), Some(conn)) = (session.upgrade(), watched.upgrade()) else {
            return;
        };
        let reason = conn.lost_reason();
        let failed = inner.slot.send_if_modified(|slot| match slot {
            Slot::Ready(current) if Arc::ptr_eq(current, &conn) => {
                *slot = Slot::Failed(ClientError::ConnectionLost(reason.clone()));
                true
            }
            _ => false,
        });
        if failed {
            tracing::error!(%reason, "client session lost its connection");
        }
    });
}
