//! Execution context propagation
//!
//! Every workflow and activity invocation receives an [`ExecutionContext`]:
//! a cancellation scope, an optional deadline and an ordered list of baggage
//! entries attached when the workflow was started. Contexts are values passed
//! by reference; there is no ambient or global context.
//!
//! Cancellation is one-directional. A scope derived with
//! [`ExecutionContext::with_cancel`] observes its parent's cancellation but
//! its [`CancelHandle`] only cancels itself and its own descendants.

mod propagation;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use propagation::{
    default_propagators, Baggage, BaggagePropagator, ContextPropagator, TraceContext,
    TraceContextPropagator, TRACEPARENT_KEY,
};

/// Why a context stopped accepting work
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextDone {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Request-scoped values carried across every invocation boundary
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    baggage: Arc<Baggage>,
    trace_context: Option<TraceContext>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

impl ExecutionContext {
    /// Root context: never cancelled, no deadline, no baggage
    pub fn background() -> Self {
        Self {
            baggage: Arc::new(Baggage::new()),
            trace_context: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Root context carrying the given baggage
    pub fn with_initial_baggage(baggage: Baggage) -> Self {
        Self {
            baggage: Arc::new(baggage),
            ..Self::background()
        }
    }

    /// Derive a context with one more baggage entry
    ///
    /// The derived context shares this context's cancellation scope.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut baggage = (*self.baggage).clone();
        baggage.insert(key, value);
        Self {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// Derive a context carrying trace identity
    pub fn with_trace_context(&self, trace_context: TraceContext) -> Self {
        Self {
            trace_context: Some(trace_context),
            ..self.clone()
        }
    }

    /// Derive a context whose deadline is no later than `deadline`
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.clone()
        }
    }

    /// Derive a context that expires `timeout` from now
    ///
    /// A timeout past the end of the clock leaves the deadline unchanged.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// Derive a child cancellation scope
    ///
    /// Cancelling the returned handle cancels the child only.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self.cancellation.child_token();
        let child = Self {
            cancellation: token.clone(),
            ..self.clone()
        };
        (child, CancelHandle { token })
    }

    pub fn baggage(&self) -> &Baggage {
        &self.baggage
    }

    pub fn trace_context(&self) -> Option<&TraceContext> {
        self.trace_context.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancellation or deadline state, `None` while the context is live
    pub fn err(&self) -> Option<ContextDone> {
        if self.is_cancelled() {
            Some(ContextDone::Cancelled)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(ContextDone::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the context is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) -> ContextDone {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancellation.cancelled() => ContextDone::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextDone::DeadlineExceeded,
            },
            None => {
                self.cancellation.cancelled().await;
                ContextDone::Cancelled
            }
        }
    }

    /// Run `future` unless the context finishes first
    pub async fn run<F>(&self, future: F) -> Result<F::Output, ContextDone>
    where
        F: std::future::Future,
    {
        if let Some(done) = self.err() {
            return Err(done);
        }
        tokio::select! {
            biased;
            done = self.done() => Err(done),
            output = future => Ok(output),
        }
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Derive a context bound to an externally owned token
    pub(crate) fn with_cancellation_token(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            ..self.clone()
        }
    }
}

/// Cancels the scope created by [`ExecutionContext::with_cancel`]
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_live() {
        let ctx = ExecutionContext::background();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.err(), None);
        assert!(ctx.baggage().is_empty());
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_child_cannot_cancel_parent() {
        let (parent, parent_handle) = ExecutionContext::background().with_cancel();
        let (child, child_handle) = parent.with_cancel();

        child_handle.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let (grandchild, _) = parent.with_cancel();
        parent_handle.cancel();
        assert!(parent.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_with_value_keeps_parent_untouched() {
        let parent = ExecutionContext::background().with_value("tenant", "acme");
        let child = parent.with_value("request", "r-1");

        assert_eq!(parent.baggage().len(), 1);
        assert_eq!(child.baggage().get("tenant"), Some("acme"));
        assert_eq!(child.baggage().get("request"), Some("r-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_only_shrinks() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_secs(10));
        let tighter = ctx.with_timeout(Duration::from_secs(5));
        let looser = tighter.with_timeout(Duration::from_secs(60));

        assert_eq!(tighter.remaining(), Some(Duration::from_secs(5)));
        assert_eq!(looser.deadline(), tighter.deadline());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(looser.err(), Some(ContextDone::DeadlineExceeded));
        assert_eq!(ctx.err(), None);
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_keeps_deadline() {
        let ctx = ExecutionContext::background().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);

        let bounded = ExecutionContext::background().with_timeout(Duration::from_secs(5));
        assert_eq!(bounded.with_timeout(Duration::MAX).deadline(), bounded.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_deadline() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_secs(1));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await;
        assert_eq!(result, Err(ContextDone::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_run_observes_cancellation() {
        let (ctx, handle) = ExecutionContext::background().with_cancel();
        handle.cancel();
        let result = ctx.run(async { 42 }).await;
        assert_eq!(result, Err(ContextDone::Cancelled));
    }
}
