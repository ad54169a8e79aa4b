//! Workflow history events

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::activity::{ActivityError, ActivityInvocationPolicy};
use crate::context::Baggage;
use crate::reliability::TimeoutError;
use crate::serde_util::duration_millis;

/// One entry of an execution's history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    /// 1-based position in the history
    pub event_id: i64,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub event: WorkflowEvent,
}

/// Events recorded by the engine for a workflow execution
///
/// History is append-only. Workers rebuild workflow state by replaying it in
/// order on every decision task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    /// Workflow was started with the given input
    WorkflowStarted {
        workflow_type: String,
        task_list: String,
        input: serde_json::Value,
        /// Propagated context attached by the starting client
        #[serde(default)]
        header: Baggage,
        #[serde(with = "duration_millis")]
        execution_timeout: Duration,
        #[serde(with = "duration_millis")]
        decision_timeout: Duration,
    },

    /// Cancellation of the execution was requested
    WorkflowCancelRequested { reason: String },

    /// Workflow completed successfully
    WorkflowCompleted { result: serde_json::Value },

    /// Workflow failed with an error
    WorkflowFailed { error: WorkflowError },

    /// Workflow closed as cancelled
    WorkflowCancelled { details: Option<serde_json::Value> },

    /// Workflow exceeded its execution timeout
    WorkflowTimedOut,

    // =========================================================================
    // Decision Task Events
    // =========================================================================
    /// A worker completed a decision task
    DecisionTaskCompleted { identity: String },

    /// A worker reported a decision task failure
    DecisionTaskFailed { cause: String, message: String },

    /// A decision task was not completed within the decision timeout
    DecisionTaskTimedOut,

    // =========================================================================
    // Activity Lifecycle Events
    // =========================================================================
    /// Activity was scheduled for execution
    ActivityScheduled {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
        policy: ActivityInvocationPolicy,
    },

    /// An activity attempt was claimed by a worker
    ActivityStarted {
        activity_id: String,
        /// Attempt number (1-based)
        attempt: u32,
        identity: String,
    },

    /// Activity completed successfully
    ActivityCompleted {
        activity_id: String,
        result: serde_json::Value,
    },

    /// Activity failed and will not be retried
    ActivityFailed {
        activity_id: String,
        error: ActivityError,
    },

    /// Activity timed out and will not be retried
    ActivityTimedOut {
        activity_id: String,
        timeout: TimeoutError,
        /// Last heartbeat details
        details: Option<serde_json::Value>,
    },

    /// Workflow asked for the activity to be cancelled
    ActivityCancelRequested { activity_id: String },

    /// Activity acknowledged cancellation
    ActivityCancelled {
        activity_id: String,
        details: Option<serde_json::Value>,
    },

    // =========================================================================
    // Timer Events
    // =========================================================================
    /// Timer was started
    TimerStarted {
        timer_id: String,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    /// Timer fired
    TimerFired { timer_id: String },
}

impl WorkflowEvent {
    /// Get the event type as a string (for logging)
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCancelRequested { .. } => "workflow_cancel_requested",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::WorkflowCancelled { .. } => "workflow_cancelled",
            Self::WorkflowTimedOut => "workflow_timed_out",
            Self::DecisionTaskCompleted { .. } => "decision_task_completed",
            Self::DecisionTaskFailed { .. } => "decision_task_failed",
            Self::DecisionTaskTimedOut => "decision_task_timed_out",
            Self::ActivityScheduled { .. } => "activity_scheduled",
            Self::ActivityStarted { .. } => "activity_started",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
            Self::ActivityTimedOut { .. } => "activity_timed_out",
            Self::ActivityCancelRequested { .. } => "activity_cancel_requested",
            Self::ActivityCancelled { .. } => "activity_cancelled",
            Self::TimerStarted { .. } => "timer_started",
            Self::TimerFired { .. } => "timer_fired",
        }
    }

    /// Check if this event closes the workflow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
                | Self::WorkflowTimedOut
        )
    }

    /// Check if the workflow must make a new decision after this event
    pub fn needs_decision(&self) -> bool {
        matches!(
            self,
            Self::WorkflowStarted { .. }
                | Self::WorkflowCancelRequested { .. }
                | Self::DecisionTaskFailed { .. }
                | Self::DecisionTaskTimedOut
                | Self::ActivityCompleted { .. }
                | Self::ActivityFailed { .. }
                | Self::ActivityTimedOut { .. }
                | Self::ActivityCancelled { .. }
                | Self::TimerFired { .. }
        )
    }

    /// Activity the event belongs to, if any
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityStarted { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. }
            | Self::ActivityTimedOut { activity_id, .. }
            | Self::ActivityCancelRequested { activity_id }
            | Self::ActivityCancelled { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }
}
