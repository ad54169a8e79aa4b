//! Workflow actions

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::activity::ActivityOptions;
use crate::serde_util::duration_millis;

/// Actions a workflow can request
///
/// These are the commands a workflow returns in response to events. The
/// decision driver turns new actions into validated decisions for the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Schedule an activity for execution
    ScheduleActivity {
        /// Unique identifier for this activity within the workflow
        activity_id: String,

        /// Name the activity is registered under
        activity_type: String,

        /// Input data for the activity (JSON)
        input: serde_json::Value,

        /// Per-call options, merged over the workflow's defaults
        #[serde(default)]
        options: ActivityOptions,
    },

    /// Request cancellation of a pending activity
    RequestCancelActivity {
        /// ID of the activity to cancel
        activity_id: String,
    },

    /// Start a timer that fires after the specified duration
    StartTimer {
        /// Unique identifier for this timer within the workflow
        timer_id: String,

        /// Duration to wait before firing
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    /// Complete the workflow successfully with a result
    CompleteWorkflow {
        /// Result value (JSON)
        result: serde_json::Value,
    },

    /// Fail the workflow with an error
    FailWorkflow {
        /// Error details
        error: WorkflowError,
    },

    /// Close the workflow as cancelled
    CancelWorkflow {
        /// Optional details recorded with the cancellation
        details: Option<serde_json::Value>,
    },
}

impl WorkflowAction {
    /// Create a schedule activity action with default options
    pub fn schedule_activity(
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ScheduleActivity {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
            options: ActivityOptions::default(),
        }
    }

    /// Create a schedule activity action with explicit options
    pub fn schedule_activity_with_options(
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: serde_json::Value,
        options: ActivityOptions,
    ) -> Self {
        Self::ScheduleActivity {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
            options,
        }
    }

    /// Create a cancel activity action
    pub fn cancel_activity(activity_id: impl Into<String>) -> Self {
        Self::RequestCancelActivity {
            activity_id: activity_id.into(),
        }
    }

    /// Create a complete workflow action
    pub fn complete(result: serde_json::Value) -> Self {
        Self::CompleteWorkflow { result }
    }

    /// Create a fail workflow action
    pub fn fail(error: WorkflowError) -> Self {
        Self::FailWorkflow { error }
    }

    /// Create a cancel workflow action
    pub fn cancel(details: Option<serde_json::Value>) -> Self {
        Self::CancelWorkflow { details }
    }

    /// Create a timer action
    pub fn timer(timer_id: impl Into<String>, duration: Duration) -> Self {
        Self::StartTimer {
            timer_id: timer_id.into(),
            duration,
        }
    }

    /// Whether this action closes the workflow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflow { .. } | Self::FailWorkflow { .. } | Self::CancelWorkflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_activity_helper() {
        let action = WorkflowAction::schedule_activity(
            "step-1",
            "process_echo",
            serde_json::json!("amar"),
        );

        match action {
            WorkflowAction::ScheduleActivity {
                activity_id,
                activity_type,
                options,
                ..
            } => {
                assert_eq!(activity_id, "step-1");
                assert_eq!(activity_type, "process_echo");
                assert_eq!(options, ActivityOptions::default());
            }
            _ => panic!("expected ScheduleActivity"),
        }
    }

    #[test]
    fn test_is_terminal() {
        assert!(WorkflowAction::complete(serde_json::json!(1)).is_terminal());
        assert!(WorkflowAction::fail(WorkflowError::new("x")).is_terminal());
        assert!(WorkflowAction::cancel(None).is_terminal());
        assert!(!WorkflowAction::timer("t", Duration::from_secs(1)).is_terminal());
        assert!(!WorkflowAction::cancel_activity("a").is_terminal());
    }

    #[test]
    fn test_action_serialization() {
        let action = WorkflowAction::timer("wait", Duration::from_secs(5));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "start_timer");
        assert_eq!(json["duration"], 5000);

        let parsed: WorkflowAction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, action);
    }
}
