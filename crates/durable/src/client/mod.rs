//! Workflow invocation client
//!
//! [`WorkflowClient`] starts, cancels and inspects workflow executions. It
//! shares the engine connection with the worker. Every call runs under the
//! caller's [`ExecutionContext`]: a cancelled or expired context aborts the
//! request with [`DispatchError::Cancelled`] or
//! [`DispatchError::DeadlineExceeded`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::context::{default_propagators, Baggage, ContextPropagator, ExecutionContext};
use crate::error::{ConfigurationError, DispatchError};
use crate::serde_util::duration_millis;
use crate::service::{
    ExecutionHandle, ExecutionInfo, ServiceError, StartWorkflowRequest, WorkflowService,
};
use crate::worker::FeatureFlags;
use crate::workflow::{HistoryEvent, Workflow};

/// Options for starting a workflow execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWorkflowOptions {
    /// Business identifier of the execution
    pub id: String,

    /// Task list the decision tasks are dispatched on
    pub task_list: String,

    /// Bound on the whole execution
    #[serde(with = "duration_millis")]
    pub execution_timeout: Duration,

    /// Bound on each decision task
    #[serde(with = "duration_millis")]
    pub decision_timeout: Duration,
}

impl StartWorkflowOptions {
    pub fn new(
        id: impl Into<String>,
        task_list: impl Into<String>,
        execution_timeout: Duration,
        decision_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            task_list: task_list.into(),
            execution_timeout,
            decision_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.id.trim().is_empty() {
            return Err(DispatchError::InvalidOptions(
                "workflow id must not be empty".to_string(),
            ));
        }
        if self.task_list.trim().is_empty() {
            return Err(DispatchError::InvalidOptions(
                "task list must not be empty".to_string(),
            ));
        }
        if self.execution_timeout.is_zero() {
            return Err(DispatchError::InvalidOptions(
                "execution timeout must be positive".to_string(),
            ));
        }
        if self.decision_timeout.is_zero() {
            return Err(DispatchError::InvalidOptions(
                "decision timeout must be positive".to_string(),
            ));
        }
        for (field, value) in [
            ("execution_timeout", self.execution_timeout),
            ("decision_timeout", self.decision_timeout),
        ] {
            ConfigurationError::check_bounded(field, value)
                .map_err(|e| DispatchError::InvalidOptions(e.to_string()))?;
        }
        Ok(())
    }
}

/// Client for starting and inspecting workflow executions
pub struct WorkflowClient {
    service: Arc<dyn WorkflowService>,
    domain: String,
    identity: String,
    propagators: Vec<Arc<dyn ContextPropagator>>,
    feature_flags: FeatureFlags,
}

impl WorkflowClient {
    pub fn new(service: Arc<dyn WorkflowService>, domain: impl Into<String>) -> Self {
        Self {
            service,
            domain: domain.into(),
            identity: format!("client-{}", Uuid::now_v7()),
            propagators: default_propagators(),
            feature_flags: FeatureFlags::default(),
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_propagators(mut self, propagators: Vec<Arc<dyn ContextPropagator>>) -> Self {
        self.propagators = propagators;
        self
    }

    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Start a workflow by registered name
    ///
    /// Returns once the engine has accepted the execution. Baggage from `ctx`
    /// is attached as the execution header.
    #[instrument(
        skip(self, ctx, options, input),
        fields(workflow_id = %options.id, task_list = %options.task_list)
    )]
    pub async fn start_workflow<I: Serialize>(
        &self,
        ctx: &ExecutionContext,
        options: &StartWorkflowOptions,
        workflow_name: &str,
        input: I,
    ) -> Result<ExecutionHandle, DispatchError> {
        options.validate()?;
        if workflow_name.trim().is_empty() {
            return Err(DispatchError::InvalidOptions(
                "workflow name must not be empty".to_string(),
            ));
        }
        let input = serde_json::to_value(input)?;

        let mut header = Baggage::new();
        for propagator in &self.propagators {
            propagator.inject(ctx, &mut header);
        }

        let request = StartWorkflowRequest {
            domain: self.domain.clone(),
            workflow_id: options.id.clone(),
            workflow_type: workflow_name.to_string(),
            task_list: options.task_list.clone(),
            input,
            execution_timeout: options.execution_timeout,
            decision_timeout: options.decision_timeout,
            header,
            identity: self.identity.clone(),
        };

        let handle = ctx
            .run(self.service.start_workflow_execution(request))
            .await?
            .map_err(|e| self.map_service_error(e))?;

        info!(
            workflow_id = %handle.workflow_id,
            run_id = %handle.run_id,
            workflow_type = workflow_name,
            "Started workflow"
        );
        Ok(handle)
    }

    /// Start a workflow by its type constant
    pub async fn start_workflow_typed<W: Workflow>(
        &self,
        ctx: &ExecutionContext,
        options: &StartWorkflowOptions,
        input: &W::Input,
    ) -> Result<ExecutionHandle, DispatchError> {
        self.start_workflow(ctx, options, W::TYPE, input).await
    }

    /// Ask an execution to cancel; `None` run ID targets the latest run
    #[instrument(skip(self, ctx))]
    pub async fn cancel_workflow(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: &str,
    ) -> Result<(), DispatchError> {
        ctx.run(self.service.request_cancel_workflow_execution(
            &self.domain,
            workflow_id,
            run_id,
            reason,
            &self.identity,
        ))
        .await?
        .map_err(|e| self.map_service_error(e))?;
        info!(workflow_id, "Requested workflow cancellation");
        Ok(())
    }

    pub async fn describe_workflow(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<ExecutionInfo, DispatchError> {
        ctx.run(
            self.service
                .describe_workflow_execution(&self.domain, workflow_id, run_id),
        )
        .await?
        .map_err(|e| self.map_service_error(e))
    }

    pub async fn get_workflow_history(
        &self,
        ctx: &ExecutionContext,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<Vec<HistoryEvent>, DispatchError> {
        ctx.run(
            self.service
                .get_workflow_execution_history(&self.domain, workflow_id, run_id),
        )
        .await?
        .map_err(|e| self.map_service_error(e))
    }

    /// Wait for a run to close and return its final description
    ///
    /// Polls every `poll_interval`; bound the wait with a deadline on `ctx`.
    pub async fn get_workflow_result(
        &self,
        ctx: &ExecutionContext,
        handle: &ExecutionHandle,
        poll_interval: Duration,
    ) -> Result<ExecutionInfo, DispatchError> {
        loop {
            let info = self
                .describe_workflow(ctx, &handle.workflow_id, Some(&handle.run_id))
                .await?;
            if info.status.is_closed() {
                return Ok(info);
            }
            debug!(%handle, status = %info.status, "Workflow still running");
            ctx.run(tokio::time::sleep(poll_interval)).await?;
        }
    }

    fn map_service_error(&self, error: ServiceError) -> DispatchError {
        match error {
            ServiceError::WorkflowExecutionAlreadyStarted {
                workflow_id,
                run_id,
            } => DispatchError::AlreadyStarted {
                workflow_id,
                run_id,
            },
            ServiceError::WorkflowExecutionAlreadyCompleted {
                workflow_id,
                run_id,
            } => {
                if self.feature_flags.workflow_execution_already_completed_error {
                    DispatchError::AlreadyCompleted {
                        workflow_id,
                        run_id,
                    }
                } else {
                    DispatchError::NotFound(format!("{workflow_id}/{run_id}"))
                }
            }
            ServiceError::EntityNotFound(what) => DispatchError::NotFound(what),
            other => DispatchError::Rejected(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::context::TRACEPARENT_KEY;
    use crate::service::{Decision, InMemoryWorkflowService};
    use crate::workflow::WorkflowEvent;

    fn client() -> (Arc<InMemoryWorkflowService>, WorkflowClient) {
        let service = Arc::new(InMemoryWorkflowService::new().with_domain("cadence-test"));
        let client = WorkflowClient::new(service.clone(), "cadence-test").with_identity("test");
        (service, client)
    }

    fn options(id: &str) -> StartWorkflowOptions {
        StartWorkflowOptions::new(
            id,
            "halfblood",
            Duration::from_secs(300),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_start_attaches_baggage_header() {
        let (_, client) = client();
        let ctx = ExecutionContext::background()
            .with_value("tenant", "acme")
            .with_trace_context(crate::context::TraceContext::generate());

        let handle = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap();
        assert_eq!(handle.workflow_id, "run-1");

        let history = client
            .get_workflow_history(&ctx, "run-1", Some(&handle.run_id))
            .await
            .unwrap();
        match &history[0].event {
            WorkflowEvent::WorkflowStarted { input, header, .. } => {
                assert_eq!(input, &json!("amar"));
                assert_eq!(header.get("tenant"), Some("acme"));
                assert!(header.get(TRACEPARENT_KEY).is_some());
            }
            other => panic!("unexpected first event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_start_is_rejected() {
        let (service, client) = client();
        let ctx = ExecutionContext::background();
        let first = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap();

        let err = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap_err();
        match err {
            DispatchError::AlreadyStarted { run_id, .. } => assert_eq!(run_id, first.run_id),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(service.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_request() {
        let (service, client) = client();
        let ctx = ExecutionContext::background();

        let mut bad = options("");
        let err = client
            .start_workflow(&ctx, &bad, "hello_world", "amar")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidOptions(_)));

        bad = options("run-1");
        bad.decision_timeout = Duration::ZERO;
        let err = client
            .start_workflow(&ctx, &bad, "hello_world", "amar")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidOptions(_)));
        assert_eq!(service.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_timeouts_rejected() {
        let (service, client) = client();
        let ctx = ExecutionContext::background();

        let mut bad = options("run-1");
        bad.execution_timeout = Duration::MAX;
        let err = client
            .start_workflow(&ctx, &bad, "hello_world", "amar")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidOptions(_)));

        bad = options("run-1");
        bad.decision_timeout = Duration::MAX;
        let err = client
            .start_workflow(&ctx, &bad, "hello_world", "amar")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidOptions(_)));
        assert_eq!(service.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let (service, client) = client();
        let (ctx, cancel) = ExecutionContext::background().with_cancel();
        cancel.cancel();

        let err = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled));
        assert_eq!(service.execution_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_execution_error_follows_flag() {
        let (service, client) = client();
        let ctx = ExecutionContext::background();
        let handle = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap();
        client
            .cancel_workflow(&ctx, "run-1", None, "first")
            .await
            .unwrap();

        // Cancel requests are idempotent while the run is open
        client
            .cancel_workflow(&ctx, "run-1", None, "second")
            .await
            .unwrap();

        let task = service
            .poll_for_decision_task("cadence-test", "halfblood", "w", 1)
            .await
            .unwrap()
            .pop()
            .unwrap();
        service
            .respond_decision_task_completed(
                &task.task_token,
                vec![Decision::CancelWorkflowExecution { details: None }],
                "w",
            )
            .await
            .unwrap();

        let err = client
            .cancel_workflow(&ctx, "run-1", None, "third")
            .await
            .unwrap_err();
        match err {
            DispatchError::AlreadyCompleted {
                workflow_id,
                run_id,
            } => {
                assert_eq!(workflow_id, "run-1");
                assert_eq!(run_id, handle.run_id);
            }
            other => panic!("unexpected error {other:?}"),
        }

        let legacy = client.with_feature_flags(FeatureFlags {
            workflow_execution_already_completed_error: false,
        });
        let err = legacy
            .cancel_workflow(&ctx, "run-1", None, "fourth")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        let err = legacy
            .cancel_workflow(&ctx, "missing", None, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_wait_respects_deadline() {
        let (_, client) = client();
        let ctx = ExecutionContext::background();
        let handle = client
            .start_workflow(&ctx, &options("run-1"), "hello_world", "amar")
            .await
            .unwrap();

        let bounded = ctx.with_timeout(Duration::from_secs(1));
        let err = client
            .get_workflow_result(&bounded, &handle, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded));
    }
}
