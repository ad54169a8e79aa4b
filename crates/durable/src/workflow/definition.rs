//! Workflow trait definition

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{WorkflowAction, WorkflowContext};
use crate::activity::{ActivityFailure, ActivityOptions};

/// Error type for workflow failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,

    /// Whether this error is retryable
    pub retryable: bool,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

impl From<&ActivityFailure> for WorkflowError {
    fn from(failure: &ActivityFailure) -> Self {
        let code = match failure {
            ActivityFailure::Failed(error) => error
                .error_type
                .clone()
                .unwrap_or_else(|| "ACTIVITY_FAILED".to_string()),
            ActivityFailure::TimedOut(timeout) => {
                format!("ACTIVITY_TIMED_OUT_{}", timeout.timeout_type).to_uppercase()
            }
            ActivityFailure::Cancelled { .. } => "ACTIVITY_CANCELLED".to_string(),
        };
        WorkflowError::new(failure.to_string()).with_code(code)
    }
}

/// A workflow is a deterministic state machine driven by history events
///
/// Workflows define:
/// - How to start execution (`on_start`)
/// - How to handle activity outcomes (`on_activity_completed`, `on_activity_failed`)
/// - How to handle timers (`on_timer_fired`)
/// - How to react to a cancellation request (`on_cancel_requested`)
///
/// # Determinism
///
/// Each decision task replays the full history into a fresh instance, so
/// given the same events a workflow must return the same actions. Use
/// [`WorkflowContext::now`] instead of reading the clock.
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::prelude::*;
///
/// struct GreetingWorkflow {
///     name: String,
/// }
///
/// impl Workflow for GreetingWorkflow {
///     const TYPE: &'static str = "greeting";
///     type Input = String;
///     type Output = String;
///
///     fn new(input: Self::Input) -> Self {
///         Self { name: input }
///     }
///
///     fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
///         vec![WorkflowAction::schedule_activity("greet", "greet", json!(self.name))]
///     }
///
///     // ... implement other methods
/// }
/// ```
pub trait Workflow: Send + Sync + 'static {
    /// Default name the workflow is registered under
    const TYPE: &'static str;

    /// Input type for starting the workflow
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type when workflow completes successfully
    type Output: Serialize + DeserializeOwned + Send;

    /// Create a new workflow instance from input
    fn new(input: Self::Input) -> Self;

    /// Activity options applied beneath every `ScheduleActivity` action
    fn default_activity_options() -> ActivityOptions {
        ActivityOptions::default()
    }

    /// Called when the workflow starts
    fn on_start(&mut self, ctx: &WorkflowContext) -> Vec<WorkflowAction>;

    /// Called when an activity completes successfully
    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction>;

    /// Called when an activity fails, times out or is cancelled
    fn on_activity_failed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        failure: &ActivityFailure,
    ) -> Vec<WorkflowAction>;

    /// Called when a timer fires
    fn on_timer_fired(&mut self, ctx: &WorkflowContext, timer_id: &str) -> Vec<WorkflowAction> {
        let _ = (ctx, timer_id);
        vec![]
    }

    /// Called when cancellation of this execution is requested
    ///
    /// Pending activities have already been asked to cancel. The default
    /// closes the workflow as cancelled.
    fn on_cancel_requested(&mut self, ctx: &WorkflowContext, reason: &str) -> Vec<WorkflowAction> {
        let _ = ctx;
        vec![WorkflowAction::cancel(Some(serde_json::json!(reason)))]
    }
}
