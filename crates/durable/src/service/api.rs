//! Orchestration engine RPC boundary
//!
//! Everything the harness needs from the engine goes through
//! [`WorkflowService`]. Implementations must be thread-safe; one instance is
//! shared by the worker and the invocation client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityFailure, ActivityInvocationPolicy};
use crate::context::Baggage;
use crate::serde_util::duration_millis;
use crate::workflow::{HistoryEvent, WorkflowError};

/// Errors returned by the engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("workflow {workflow_id} already started (run {run_id})")]
    WorkflowExecutionAlreadyStarted { workflow_id: String, run_id: String },

    #[error("workflow {workflow_id} already completed (run {run_id})")]
    WorkflowExecutionAlreadyCompleted { workflow_id: String, run_id: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal service error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// The task or execution the request referred to no longer exists
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound(_) | Self::WorkflowExecutionAlreadyCompleted { .. }
        )
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Internal(_))
    }
}

/// Identity of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExecutionHandle {
    pub workflow_id: String,
    pub run_id: String,
}

impl fmt::Display for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Domain metadata returned by the handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainInfo {
    pub name: String,
    pub description: String,
}

/// Request to begin a new workflow execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartWorkflowRequest {
    pub domain: String,
    pub workflow_id: String,
    pub workflow_type: String,
    pub task_list: String,
    pub input: serde_json::Value,
    #[serde(with = "duration_millis")]
    pub execution_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub decision_timeout: Duration,
    #[serde(default)]
    pub header: Baggage,
    pub identity: String,
}

/// Lifecycle state of an execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl WorkflowStatus {
    pub fn is_closed(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

/// Snapshot returned by describe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionInfo {
    pub handle: ExecutionHandle,
    pub workflow_type: String,
    pub task_list: String,
    pub status: WorkflowStatus,
    pub start_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    pub history_length: i64,
}

/// Validated command produced by a decision task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    ScheduleActivityTask {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
        policy: ActivityInvocationPolicy,
        /// Workflow header, forwarded unchanged
        #[serde(default)]
        header: Baggage,
    },
    RequestCancelActivityTask {
        activity_id: String,
    },
    StartTimer {
        timer_id: String,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },
    CompleteWorkflowExecution {
        result: serde_json::Value,
    },
    FailWorkflowExecution {
        error: WorkflowError,
    },
    CancelWorkflowExecution {
        details: Option<serde_json::Value>,
    },
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompleteWorkflowExecution { .. }
                | Self::FailWorkflowExecution { .. }
                | Self::CancelWorkflowExecution { .. }
        )
    }
}

/// Why a worker could not produce decisions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionFailureCause {
    UnknownWorkflowType,
    BadInput,
    NonDeterministic,
    InvalidActivityPolicy,
    DuplicateActivityId,
    WorkflowPanic,
    WorkerStopping,
}

impl fmt::Display for DecisionFailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnknownWorkflowType => "UNKNOWN_WORKFLOW_TYPE",
            Self::BadInput => "BAD_INPUT",
            Self::NonDeterministic => "NON_DETERMINISTIC",
            Self::InvalidActivityPolicy => "INVALID_ACTIVITY_POLICY",
            Self::DuplicateActivityId => "DUPLICATE_ACTIVITY_ID",
            Self::WorkflowPanic => "WORKFLOW_PANIC",
            Self::WorkerStopping => "WORKER_STOPPING",
        };
        f.write_str(name)
    }
}

/// Failure report for a decision task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionFailure {
    pub cause: DecisionFailureCause,
    pub message: String,
    /// A retryable failure reschedules the decision task; otherwise the
    /// execution fails
    pub retryable: bool,
}

/// Decision work handed to a worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTask {
    pub task_token: String,
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    /// Events up to this ID were handled by earlier decisions
    pub previous_started_event_id: i64,
    pub attempt: u32,
    pub history: Vec<HistoryEvent>,
}

impl DecisionTask {
    pub fn handle(&self) -> ExecutionHandle {
        ExecutionHandle {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

/// Activity attempt handed to a worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityTask {
    pub task_token: String,
    pub workflow_id: String,
    pub run_id: String,
    pub workflow_type: String,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub attempt: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub policy: ActivityInvocationPolicy,
    #[serde(default)]
    pub header: Baggage,
    /// Details recorded by the last heartbeat of a previous attempt
    pub heartbeat_details: Option<serde_json::Value>,
}

/// Engine reply to a heartbeat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HeartbeatResponse {
    pub cancel_requested: bool,
}

/// Client-side view of the orchestration engine
///
/// Polls are non-blocking: they return an empty batch when no work is
/// available and the caller backs off.
#[async_trait]
pub trait WorkflowService: Send + Sync + 'static {
    // =========================================================================
    // Domain and Execution Operations
    // =========================================================================

    /// Handshake: fetch domain metadata
    async fn describe_domain(&self, domain: &str) -> Result<DomainInfo, ServiceError>;

    /// Begin a new execution
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<ExecutionHandle, ServiceError>;

    /// Ask a running execution to cancel
    async fn request_cancel_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: &str,
        identity: &str,
    ) -> Result<(), ServiceError>;

    /// Describe an execution; `None` run ID means the latest run
    async fn describe_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<ExecutionInfo, ServiceError>;

    /// Full history of an execution
    async fn get_workflow_execution_history(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<Vec<HistoryEvent>, ServiceError>;

    // =========================================================================
    // Decision Task Operations
    // =========================================================================

    async fn poll_for_decision_task(
        &self,
        domain: &str,
        task_list: &str,
        identity: &str,
        max_tasks: usize,
    ) -> Result<Vec<DecisionTask>, ServiceError>;

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        identity: &str,
    ) -> Result<(), ServiceError>;

    async fn respond_decision_task_failed(
        &self,
        task_token: &str,
        failure: DecisionFailure,
        identity: &str,
    ) -> Result<(), ServiceError>;

    // =========================================================================
    // Activity Task Operations
    // =========================================================================

    async fn poll_for_activity_task(
        &self,
        domain: &str,
        task_list: &str,
        identity: &str,
        max_tasks: usize,
    ) -> Result<Vec<ActivityTask>, ServiceError>;

    async fn record_activity_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<serde_json::Value>,
        identity: &str,
    ) -> Result<HeartbeatResponse, ServiceError>;

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: serde_json::Value,
        identity: &str,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        failure: ActivityFailure,
        identity: &str,
    ) -> Result<(), ServiceError>;

    async fn respond_activity_task_canceled(
        &self,
        task_token: &str,
        details: Option<serde_json::Value>,
        identity: &str,
    ) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_classification() {
        assert!(ServiceError::EntityNotFound("t".into()).is_gone());
        assert!(ServiceError::WorkflowExecutionAlreadyCompleted {
            workflow_id: "w".into(),
            run_id: "r".into()
        }
        .is_gone());
        assert!(!ServiceError::BadRequest("x".into()).is_gone());
        assert!(ServiceError::Unavailable("down".into()).is_transient());
    }

    #[test]
    fn test_status_closed() {
        assert!(!WorkflowStatus::Running.is_closed());
        assert!(WorkflowStatus::TimedOut.is_closed());
        assert_eq!(WorkflowStatus::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn test_handle_display() {
        let handle = ExecutionHandle {
            workflow_id: "helloworld_1".into(),
            run_id: "r-1".into(),
        };
        assert_eq!(handle.to_string(), "helloworld_1/r-1");
    }

    #[test]
    fn test_decision_serialization() {
        let decision = Decision::StartTimer {
            timer_id: "t".into(),
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["type"], "start_timer");
        assert_eq!(json["duration"], 1500);
        assert!(!decision.is_terminal());
    }
}
