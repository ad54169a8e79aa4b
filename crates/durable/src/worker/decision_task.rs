//! Decision task execution

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{panic_message, report_outcome, FeatureFlags};
use crate::context::{Baggage, ContextPropagator, ExecutionContext};
use crate::engine::{DecisionError, DispatchTable};
use crate::service::{
    Decision, DecisionFailure, DecisionFailureCause, DecisionTask, WorkflowService,
};
use crate::workflow::WorkflowEvent;

pub(crate) struct DecisionTaskRunner {
    pub(crate) service: Arc<dyn WorkflowService>,
    pub(crate) table: Arc<DispatchTable>,
    pub(crate) identity: String,
    pub(crate) propagators: Vec<Arc<dyn ContextPropagator>>,
    pub(crate) root: CancellationToken,
    pub(crate) feature_flags: FeatureFlags,
}

impl DecisionTaskRunner {
    /// Handle tasks of one execution in delivery order
    pub(crate) async fn handle_all(&self, tasks: Vec<DecisionTask>) {
        for task in tasks {
            self.handle(task).await;
        }
    }

    #[instrument(
        skip(self, task),
        fields(
            workflow_id = %task.workflow_id,
            run_id = %task.run_id,
            workflow_type = %task.workflow_type,
            attempt = task.attempt,
        )
    )]
    pub(crate) async fn handle(&self, task: DecisionTask) {
        let token = task.task_token.as_str();
        let result = match self.decide(&task) {
            Ok(decisions) => {
                debug!(count = decisions.len(), "Decision task completed");
                self.service
                    .respond_decision_task_completed(token, decisions, &self.identity)
                    .await
            }
            Err(failure) => {
                info!(
                    cause = %failure.cause,
                    message = %failure.message,
                    "Decision task failed"
                );
                self.service
                    .respond_decision_task_failed(token, failure, &self.identity)
                    .await
            }
        };
        report_outcome(result, self.feature_flags, "decision", token);
    }

    fn decide(&self, task: &DecisionTask) -> Result<Vec<Decision>, DecisionFailure> {
        if self.root.is_cancelled() {
            return Err(DecisionFailure {
                cause: DecisionFailureCause::WorkerStopping,
                message: "worker is stopping".to_string(),
                retryable: true,
            });
        }

        let handler = self.table.workflow(&task.workflow_type).map_err(|e| {
            warn!(error = %e, "Rejecting decision task");
            DecisionFailure {
                cause: DecisionFailureCause::UnknownWorkflowType,
                message: e.to_string(),
                retryable: false,
            }
        })?;

        let execution = self.execution_context(task);
        match catch_unwind(AssertUnwindSafe(|| handler.decide(task, execution))) {
            Ok(Ok(decisions)) => Ok(decisions),
            Ok(Err(error)) => Err(error.to_failure()),
            Err(panic) => {
                Err(DecisionError::Panicked(panic_message(panic.as_ref())).to_failure())
            }
        }
    }

    /// Context carried by the start event, restored through the propagators
    fn execution_context(&self, task: &DecisionTask) -> ExecutionContext {
        let empty = Baggage::new();
        let header = match task.history.first().map(|e| &e.event) {
            Some(WorkflowEvent::WorkflowStarted { header, .. }) => header,
            _ => &empty,
        };
        self.propagators
            .iter()
            .fold(ExecutionContext::background(), |ctx, propagator| {
                propagator.extract(header, ctx)
            })
            .with_cancellation_token(self.root.child_token())
    }
}
