// Hello-world workflow and its echo activity
// Decision: The workflow is registered under the alias "hello_world"; the activity under its type name

use std::time::Duration;

use async_trait::async_trait;
use mammoth_durable::activity::{Activity, ActivityContext, ActivityError, ActivityFailure};
use mammoth_durable::workflow::{Workflow, WorkflowAction, WorkflowContext, WorkflowError};
use mammoth_durable::{ActivityOptions, ConfigurationError, Registry};
use serde_json::Value;
use tracing::info;

/// Alias the hello-world workflow is registered under
pub const HELLO_WORLD: &str = "hello_world";

/// Default task list of the sample worker; activities follow the workflow's
pub const TASK_LIST: &str = "halfblood";

const ECHO_ACTIVITY_ID: &str = "echo";

// =============================================================================
// Activity
// =============================================================================

/// Echoes its input back with a prefix
pub struct ProcessEchoActivity;

#[async_trait]
impl Activity for ProcessEchoActivity {
    const TYPE: &'static str = "process_echo";
    type Input = String;
    type Output = String;

    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        info!(
            workflow_id = %ctx.info().workflow_id,
            attempt = ctx.attempt(),
            value = %input,
            "process_echo called"
        );
        Ok(format!("Processed activity: {input}"))
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// Runs `process_echo` once on its input and completes with the result
pub struct HelloWorldWorkflow {
    value: String,
}

impl Workflow for HelloWorldWorkflow {
    const TYPE: &'static str = "simple_workflow";
    type Input = String;
    type Output = String;

    fn new(input: Self::Input) -> Self {
        Self { value: input }
    }

    fn default_activity_options() -> ActivityOptions {
        ActivityOptions::new()
            .with_schedule_to_close(Duration::from_secs(60))
            .with_schedule_to_start(Duration::from_secs(60))
            .with_start_to_close(Duration::from_secs(60))
            .with_heartbeat(Duration::from_secs(10))
            .with_wait_for_cancellation(false)
    }

    fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
        vec![WorkflowAction::schedule_activity(
            ECHO_ACTIVITY_ID,
            ProcessEchoActivity::TYPE,
            Value::String(self.value.clone()),
        )]
    }

    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        _activity_id: &str,
        result: Value,
    ) -> Vec<WorkflowAction> {
        if !ctx.is_replaying() {
            info!(workflow_id = %ctx.workflow_id(), %result, "Done");
        }
        vec![WorkflowAction::complete(result)]
    }

    fn on_activity_failed(
        &mut self,
        _ctx: &WorkflowContext,
        _activity_id: &str,
        failure: &ActivityFailure,
    ) -> Vec<WorkflowAction> {
        vec![WorkflowAction::fail(WorkflowError::from(failure))]
    }
}

/// Registry with the sample workflow and activity
pub fn registry() -> Result<Registry, ConfigurationError> {
    let mut registry = Registry::new();
    registry
        .register_workflow_with_alias::<HelloWorldWorkflow>(HELLO_WORLD)?
        .register_activity(ProcessEchoActivity);
    Ok(registry)
}
