//! Activity task execution
//!
//! One [`ActivityTaskRunner`] is shared by every activity task a worker
//! claims. For each task it resolves the handler, builds the activity's
//! context from the propagated header, runs the handler under the
//! start-to-close timeout and reports the outcome.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{panic_message, report_outcome, FeatureFlags};
use crate::activity::heartbeat::HeartbeatForwarder;
use crate::activity::{error_types, ActivityContext, ActivityError, ActivityFailure, ActivityInfo};
use crate::context::{ContextPropagator, ExecutionContext};
use crate::engine::{ActivityHandler, DispatchTable};
use crate::reliability::{TimeoutError, TimeoutType};
use crate::service::{ActivityTask, WorkflowService};

/// Buffered heartbeats between the activity and its forwarder
const HEARTBEAT_CHANNEL_CAPACITY: usize = 16;

pub(crate) struct ActivityTaskRunner {
    pub(crate) service: Arc<dyn WorkflowService>,
    pub(crate) table: Arc<DispatchTable>,
    pub(crate) identity: String,
    pub(crate) propagators: Vec<Arc<dyn ContextPropagator>>,
    /// Parent of every activity's cancellation token
    pub(crate) root: CancellationToken,
    pub(crate) default_heartbeat_throttle: Duration,
    pub(crate) feature_flags: FeatureFlags,
}

enum Outcome {
    Completed(serde_json::Value),
    Failed(ActivityFailure),
    Canceled(Option<serde_json::Value>),
    /// Worker stopped under the activity; the engine's timeouts reschedule it
    Abandoned,
}

impl ActivityTaskRunner {
    #[instrument(
        skip(self, task),
        fields(
            workflow_id = %task.workflow_id,
            activity_id = %task.activity_id,
            activity_type = %task.activity_type,
            attempt = task.attempt,
        )
    )]
    pub(crate) async fn handle(&self, task: ActivityTask) {
        let token = task.task_token.clone();
        let outcome = match self.table.activity(&task.activity_type) {
            Ok(handler) => self.execute(handler.as_ref(), task).await,
            Err(e) => {
                warn!(error = %e, "Rejecting activity task");
                Outcome::Failed(ActivityFailure::Failed(
                    ActivityError::non_retryable(e.to_string())
                        .with_type(error_types::UNKNOWN_ACTIVITY_TYPE),
                ))
            }
        };

        let token = token.as_str();
        let result = match outcome {
            Outcome::Completed(result) => {
                debug!("Activity completed");
                self.service
                    .respond_activity_task_completed(token, result, &self.identity)
                    .await
            }
            Outcome::Failed(failure) => {
                info!(error = %failure, "Activity failed");
                self.service
                    .respond_activity_task_failed(token, failure, &self.identity)
                    .await
            }
            Outcome::Canceled(details) => {
                info!("Activity cancelled");
                self.service
                    .respond_activity_task_canceled(token, details, &self.identity)
                    .await
            }
            Outcome::Abandoned => {
                info!("Worker stopping, leaving activity to the engine's timeouts");
                return;
            }
        };
        report_outcome(result, self.feature_flags, "activity", token);
    }

    async fn execute(&self, handler: &dyn ActivityHandler, task: ActivityTask) -> Outcome {
        let cancel = self.root.child_token();
        let start_to_close = task.policy.start_to_close;

        let execution = self
            .propagators
            .iter()
            .fold(ExecutionContext::background(), |ctx, propagator| {
                propagator.extract(&task.header, ctx)
            })
            .with_cancellation_token(cancel.clone())
            .with_timeout(start_to_close);

        let info = ActivityInfo {
            task_token: task.task_token.clone(),
            workflow_id: task.workflow_id,
            run_id: task.run_id,
            workflow_type: task.workflow_type,
            activity_id: task.activity_id,
            activity_type: task.activity_type,
            task_list: task.policy.task_list.clone(),
            attempt: task.attempt,
            max_attempts: task.policy.max_attempts(),
            scheduled_at: task.scheduled_at,
            started_at: task.started_at,
            start_to_close,
            heartbeat_timeout: task.policy.heartbeat,
        };

        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(HEARTBEAT_CHANNEL_CAPACITY);
        let forwarder = HeartbeatForwarder::new(
            Arc::clone(&self.service),
            task.task_token,
            self.identity.clone(),
            task.policy
                .heartbeat_throttle()
                .unwrap_or(self.default_heartbeat_throttle),
            cancel.clone(),
        );
        let cancel_requested = forwarder.cancel_requested();
        tokio::spawn(forwarder.run(heartbeat_rx));

        let ctx = ActivityContext::new(info, execution)
            .with_heartbeat(heartbeat_tx)
            .with_heartbeat_details(task.heartbeat_details);

        let invocation = AssertUnwindSafe(handler.invoke(&ctx, task.input)).catch_unwind();
        let outcome = match tokio::time::timeout(start_to_close, invocation).await {
            Err(_) => {
                cancel.cancel();
                Outcome::Failed(ActivityFailure::TimedOut(TimeoutError::new(
                    TimeoutType::StartToClose,
                    start_to_close,
                )))
            }
            Ok(Err(panic)) => Outcome::Failed(ActivityFailure::Failed(
                ActivityError::non_retryable(panic_message(panic.as_ref()))
                    .with_type(error_types::PANIC),
            )),
            Ok(Ok(Ok(result))) => Outcome::Completed(result),
            Ok(Ok(Err(error))) if cancel_requested.is_cancelled() => {
                Outcome::Canceled(error.details)
            }
            Ok(Ok(Err(_))) if self.root.is_cancelled() => Outcome::Abandoned,
            Ok(Ok(Err(error))) => Outcome::Failed(ActivityFailure::Failed(error)),
        };

        // Closes the heartbeat channel, ending the forwarder
        drop(ctx);
        outcome
    }
}
