//! Recording service for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::api::*;
use crate::activity::ActivityFailure;
use crate::workflow::HistoryEvent;

/// Records activity outcomes and heartbeats; everything else is unsupported
#[derive(Default)]
pub(crate) struct RecordingService {
    heartbeats: Mutex<Vec<Option<Value>>>,
    cancel_requested: Mutex<bool>,
    completed: Mutex<Vec<(String, Value)>>,
    failed: Mutex<Vec<(String, ActivityFailure)>>,
    canceled: Mutex<Vec<String>>,
    decisions: Mutex<Vec<(String, Vec<Decision>)>>,
    decision_failures: Mutex<Vec<(String, DecisionFailure)>>,
}

impl RecordingService {
    pub(crate) fn heartbeats(&self) -> Vec<Option<Value>> {
        self.heartbeats.lock().clone()
    }

    /// Make every later heartbeat ask for cancellation
    pub(crate) fn request_cancel(&self) {
        *self.cancel_requested.lock() = true;
    }

    pub(crate) fn completed(&self) -> Vec<(String, Value)> {
        self.completed.lock().clone()
    }

    pub(crate) fn failed(&self) -> Vec<(String, ActivityFailure)> {
        self.failed.lock().clone()
    }

    pub(crate) fn canceled(&self) -> Vec<String> {
        self.canceled.lock().clone()
    }

    pub(crate) fn decisions(&self) -> Vec<(String, Vec<Decision>)> {
        self.decisions.lock().clone()
    }

    pub(crate) fn decision_failures(&self) -> Vec<(String, DecisionFailure)> {
        self.decision_failures.lock().clone()
    }
}

fn unsupported<T>(operation: &str) -> Result<T, ServiceError> {
    Err(ServiceError::BadRequest(format!(
        "{operation} is not supported by the recording service"
    )))
}

#[async_trait]
impl WorkflowService for RecordingService {
    async fn describe_domain(&self, domain: &str) -> Result<DomainInfo, ServiceError> {
        Ok(DomainInfo {
            name: domain.to_string(),
            description: String::new(),
        })
    }

    async fn start_workflow_execution(
        &self,
        _request: StartWorkflowRequest,
    ) -> Result<ExecutionHandle, ServiceError> {
        unsupported("start_workflow_execution")
    }

    async fn request_cancel_workflow_execution(
        &self,
        _domain: &str,
        _workflow_id: &str,
        _run_id: Option<&str>,
        _reason: &str,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        unsupported("request_cancel_workflow_execution")
    }

    async fn describe_workflow_execution(
        &self,
        _domain: &str,
        _workflow_id: &str,
        _run_id: Option<&str>,
    ) -> Result<ExecutionInfo, ServiceError> {
        unsupported("describe_workflow_execution")
    }

    async fn get_workflow_execution_history(
        &self,
        _domain: &str,
        _workflow_id: &str,
        _run_id: Option<&str>,
    ) -> Result<Vec<HistoryEvent>, ServiceError> {
        unsupported("get_workflow_execution_history")
    }

    async fn poll_for_decision_task(
        &self,
        _domain: &str,
        _task_list: &str,
        _identity: &str,
        _max_tasks: usize,
    ) -> Result<Vec<DecisionTask>, ServiceError> {
        Ok(vec![])
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        self.decisions
            .lock()
            .push((task_token.to_string(), decisions));
        Ok(())
    }

    async fn respond_decision_task_failed(
        &self,
        task_token: &str,
        failure: DecisionFailure,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        self.decision_failures
            .lock()
            .push((task_token.to_string(), failure));
        Ok(())
    }

    async fn poll_for_activity_task(
        &self,
        _domain: &str,
        _task_list: &str,
        _identity: &str,
        _max_tasks: usize,
    ) -> Result<Vec<ActivityTask>, ServiceError> {
        Ok(vec![])
    }

    async fn record_activity_task_heartbeat(
        &self,
        _task_token: &str,
        details: Option<Value>,
        _identity: &str,
    ) -> Result<HeartbeatResponse, ServiceError> {
        self.heartbeats.lock().push(details);
        Ok(HeartbeatResponse {
            cancel_requested: *self.cancel_requested.lock(),
        })
    }

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Value,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        self.completed.lock().push((task_token.to_string(), result));
        Ok(())
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        failure: ActivityFailure,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        self.failed.lock().push((task_token.to_string(), failure));
        Ok(())
    }

    async fn respond_activity_task_canceled(
        &self,
        task_token: &str,
        _details: Option<Value>,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        self.canceled.lock().push(task_token.to_string());
        Ok(())
    }
}
