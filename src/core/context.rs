/// Call Context
///
/// Explicit per-call value carrying the cancellation signal, an optional
/// deadline and the parent tracing span. It is threaded through every call
/// boundary instead of living in ambient global state.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::core::error::ClientError;

#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    span: Span,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// Fresh context parented on the current span, with no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            span: Span::current(),
        }
    }

    /// Tighten the deadline to at most `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Derived context: cancelled along with its parent, never the reverse.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            span: self.span.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Drive `fut` until it completes, the context is cancelled, or the
    /// deadline passes, whichever comes first.
    ///
    /// Dropping `fut` on cancellation is the only side effect on the caller's
    /// work; anything shared must not depend on `fut` running to completion.
    ///
    /// # Errors
    /// Returns `ClientError::Cancelled` on cancellation or deadline expiry,
    /// otherwise whatever `fut` returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled("cancelled by caller".to_string())),
            _ = deadline => Err(ClientError::Cancelled("deadline exceeded".to_string())),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_pending_work() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let err = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, ClientError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::Cancelled("deadline exceeded".into()));
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child_only_downwards() {
        let parent = CallContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
        let err = other
            .run(std::future::pending::<Result<(), ClientError>>())
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn completed_work_wins_without_deadline() {
        let ctx = CallContext::new();
        let value = ctx.run(async { Ok::<_, ClientError>(42) }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn earlier_deadline_wins() {
        let early = Instant::now() + Duration::from_secs(1);
        let ctx = CallContext::new()
            .with_deadline(early)
            .with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(early));
    }
}
