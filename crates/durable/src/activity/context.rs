//! Activity execution context

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::context::{Baggage, ExecutionContext};

/// Payload sent with heartbeats
#[derive(Debug, Clone)]
pub struct HeartbeatPayload {
    /// Optional progress details
    pub details: Option<serde_json::Value>,
}

/// Error from heartbeat operations
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// Heartbeat channel closed (activity finished or worker stopped)
    #[error("heartbeat channel closed")]
    ChannelClosed,

    /// Activity was cancelled
    #[error("activity was cancelled")]
    Cancelled,
}

impl From<HeartbeatError> for super::ActivityError {
    fn from(err: HeartbeatError) -> Self {
        super::ActivityError::non_retryable(err.to_string()).with_type("HEARTBEAT")
    }
}

/// Identity and timing of the attempt being executed
#[derive(Debug, Clone)]
pub struct ActivityInfo {
    pub task_token: String,
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub activity_id: String,
    pub activity_type: String,
    pub task_list: String,
    /// Current attempt number (1-based)
    pub attempt: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub start_to_close: Duration,
    pub heartbeat_timeout: Option<Duration>,
}

/// Context provided to activities during execution
///
/// The context provides:
/// - Information about the current execution attempt
/// - The [`ExecutionContext`] propagated from the scheduling workflow
/// - Heartbeats, including details recorded by a previous attempt
/// - Cancellation detection
///
/// # Example
///
/// ```ignore
/// async fn execute(&self, ctx: &ActivityContext, input: Input) -> Result<Output, ActivityError> {
///     let start: u32 = ctx.heartbeat_details().unwrap_or(0);
///     for i in start..100 {
///         do_work(i).await?;
///         ctx.heartbeat(Some(json!(i + 1))).await?;
///     }
///     Ok(Output { ... })
/// }
/// ```
#[derive(Debug)]
pub struct ActivityContext {
    info: ActivityInfo,
    execution: ExecutionContext,
    heartbeat_details: Option<serde_json::Value>,
    heartbeat_tx: Option<mpsc::Sender<HeartbeatPayload>>,
}

impl ActivityContext {
    pub fn new(info: ActivityInfo, execution: ExecutionContext) -> Self {
        Self {
            info,
            execution,
            heartbeat_details: None,
            heartbeat_tx: None,
        }
    }

    /// Create a context with heartbeat support
    pub fn with_heartbeat(mut self, tx: mpsc::Sender<HeartbeatPayload>) -> Self {
        self.heartbeat_tx = Some(tx);
        self
    }

    /// Attach details recorded by the previous attempt
    pub fn with_heartbeat_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.heartbeat_details = details;
        self
    }

    pub fn info(&self) -> &ActivityInfo {
        &self.info
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn baggage(&self) -> &Baggage {
        self.execution.baggage()
    }

    pub fn attempt(&self) -> u32 {
        self.info.attempt
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.info.attempt >= self.info.max_attempts
    }

    /// Details from the last heartbeat of a previous attempt
    pub fn heartbeat_details<T: DeserializeOwned>(&self) -> Option<T> {
        self.heartbeat_details
            .as_ref()
            .and_then(|details| serde_json::from_value(details.clone()).ok())
    }

    /// Record a heartbeat
    ///
    /// Heartbeats keep the activity alive against its heartbeat timeout and
    /// carry progress details to a later attempt. They are forwarded to the
    /// engine throttled, so calling this often is cheap.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity has been cancelled or the
    /// heartbeat channel is closed.
    pub async fn heartbeat(
        &self,
        details: Option<serde_json::Value>,
    ) -> Result<(), HeartbeatError> {
        if self.is_cancelled() {
            return Err(HeartbeatError::Cancelled);
        }

        if let Some(tx) = &self.heartbeat_tx {
            tx.send(HeartbeatPayload { details })
                .await
                .map_err(|_| HeartbeatError::ChannelClosed)?;
        }

        Ok(())
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.execution.is_cancelled()
    }

    /// Resolves when cancellation is requested
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => { ... }
    ///     _ = ctx.cancelled() => {
    ///         return Err(ActivityError::non_retryable("cancelled"));
    ///     }
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.execution.cancelled().await
    }
}

#[cfg(test)]
pub(crate) fn test_info(activity_type: &str) -> ActivityInfo {
    ActivityInfo {
        task_token: "token-1".to_string(),
        workflow_id: "wf-1".to_string(),
        run_id: "run-1".to_string(),
        workflow_type: "test_workflow".to_string(),
        activity_id: "0".to_string(),
        activity_type: activity_type.to_string(),
        task_list: "test".to_string(),
        attempt: 1,
        max_attempts: 3,
        scheduled_at: Utc::now(),
        started_at: Utc::now(),
        start_to_close: Duration::from_secs(60),
        heartbeat_timeout: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_context_creation() {
        let ctx = ActivityContext::new(test_info("echo"), ExecutionContext::background());

        assert_eq!(ctx.info().activity_type, "echo");
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.is_cancelled());
        assert!(!ctx.is_last_attempt());
    }

    #[test]
    fn test_heartbeat_details_from_previous_attempt() {
        let ctx = ActivityContext::new(test_info("echo"), ExecutionContext::background())
            .with_heartbeat_details(Some(serde_json::json!(42)));

        assert_eq!(ctx.heartbeat_details::<u32>(), Some(42));
        assert_eq!(ctx.heartbeat_details::<String>(), None);
    }

    #[tokio::test]
    async fn test_heartbeat_when_cancelled() {
        let (execution, handle) = ExecutionContext::background().with_cancel();
        let ctx = ActivityContext::new(test_info("echo"), execution);

        handle.cancel();

        let result = ctx.heartbeat(None).await;
        assert!(matches!(result, Err(HeartbeatError::Cancelled)));
    }

    #[tokio::test]
    async fn test_heartbeat_with_channel() {
        let (tx, mut rx) = mpsc::channel(10);
        let ctx = ActivityContext::new(test_info("echo"), ExecutionContext::background())
            .with_heartbeat(tx);

        ctx.heartbeat(Some(serde_json::json!({"progress": 50})))
            .await
            .unwrap();

        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.details, Some(serde_json::json!({"progress": 50})));
    }

    #[tokio::test]
    async fn test_heartbeat_channel_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let ctx = ActivityContext::new(test_info("echo"), ExecutionContext::background())
            .with_heartbeat(tx);

        let result = ctx.heartbeat(None).await;
        assert!(matches!(result, Err(HeartbeatError::ChannelClosed)));
    }
}
