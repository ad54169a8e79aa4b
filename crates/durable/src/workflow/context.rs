//! Workflow execution context

use chrono::{DateTime, Utc};

use crate::context::{Baggage, ExecutionContext};

/// Read-only view of the execution a workflow callback runs in
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub(crate) workflow_id: String,
    pub(crate) run_id: String,
    pub(crate) workflow_type: String,
    pub(crate) task_list: String,
    pub(crate) execution: ExecutionContext,
    pub(crate) now: DateTime<Utc>,
    pub(crate) replaying: bool,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
        workflow_type: impl Into<String>,
        task_list: impl Into<String>,
        execution: ExecutionContext,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            workflow_type: workflow_type.into(),
            task_list: task_list.into(),
            execution,
            now: DateTime::<Utc>::UNIX_EPOCH,
            replaying: false,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn task_list(&self) -> &str {
        &self.task_list
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn baggage(&self) -> &Baggage {
        self.execution.baggage()
    }

    /// Timestamp of the event being processed
    ///
    /// Deterministic across replays, unlike the wall clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// True while re-applying events a previous decision already handled
    ///
    /// Use it to suppress side effects such as logging.
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }
}
