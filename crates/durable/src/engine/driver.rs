//! Decision driver with replay support
//!
//! Every decision task carries the full history. The driver builds a fresh
//! workflow instance from the start event and feeds it every event in order:
//!
//! - events at or before `previous_started_event_id` are replayed; the
//!   actions they produce already exist in history and are only checked for
//!   determinism
//! - later events are new; their actions become decisions
//!
//! A close action is remembered across the whole replay. Cancellation is held
//! back while an activity that waits for cancellation is still pending, and
//! emitted by a later decision task once that activity has settled.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::registry::AnyWorkflow;
use crate::activity::{ActivityFailure, ActivityOptions};
use crate::context::{Baggage, ExecutionContext};
use crate::error::ConfigurationError;
use crate::service::{Decision, DecisionFailure, DecisionFailureCause, DecisionTask};
use crate::workflow::{HistoryEvent, WorkflowAction, WorkflowContext, WorkflowEvent};

/// Why a decision task could not be completed
#[derive(Debug, thiserror::Error)]
pub enum DecisionError {
    /// History does not begin with a start event
    #[error("history does not start with a workflow_started event")]
    MissingStartEvent,

    /// Workflow input could not be decoded
    #[error("failed to decode workflow input: {0}")]
    InvalidInput(#[source] serde_json::Error),

    /// Replay scheduled different activities than history recorded
    #[error("history schedules activity {activity_id} but the workflow did not")]
    NonDeterministic { activity_id: String },

    /// Activity ID is already in use by a pending activity
    #[error("activity id {0} is already in use")]
    DuplicateActivityId(String),

    /// Activity policy failed to resolve or validate
    #[error("invalid policy for activity {activity_id}: {source}")]
    InvalidActivityPolicy {
        activity_id: String,
        #[source]
        source: ConfigurationError,
    },

    /// Timer duration is out of range
    #[error("invalid timer {timer_id}: {source}")]
    InvalidTimer {
        timer_id: String,
        #[source]
        source: ConfigurationError,
    },

    /// Workflow code panicked
    #[error("workflow panicked: {0}")]
    Panicked(String),
}

impl DecisionError {
    pub fn cause(&self) -> DecisionFailureCause {
        match self {
            Self::MissingStartEvent | Self::InvalidInput(_) | Self::InvalidTimer { .. } => {
                DecisionFailureCause::BadInput
            }
            Self::NonDeterministic { .. } => DecisionFailureCause::NonDeterministic,
            Self::DuplicateActivityId(_) => DecisionFailureCause::DuplicateActivityId,
            Self::InvalidActivityPolicy { .. } => DecisionFailureCause::InvalidActivityPolicy,
            Self::Panicked(_) => DecisionFailureCause::WorkflowPanic,
        }
    }

    /// Failure report for the engine; driver errors are never retried
    pub fn to_failure(&self) -> DecisionFailure {
        DecisionFailure {
            cause: self.cause(),
            message: self.to_string(),
            retryable: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingActivity {
    wait_for_cancellation: bool,
    cancel_requested: bool,
}

struct Driver<'a> {
    task: &'a DecisionTask,
    defaults: &'a ActivityOptions,
    ctx: WorkflowContext,
    header: Baggage,
    pending: HashMap<String, PendingActivity>,
    commanded: HashSet<String>,
    close: Option<WorkflowAction>,
    decisions: Vec<Decision>,
}

/// Replay `task.history` through a workflow built by `factory`
pub(crate) fn drive<F>(
    factory: F,
    defaults: &ActivityOptions,
    task: &DecisionTask,
    execution: ExecutionContext,
) -> Result<Vec<Decision>, DecisionError>
where
    F: FnOnce(Value) -> Result<Box<dyn AnyWorkflow>, serde_json::Error>,
{
    let (input, task_list, header) = match task.history.first().map(|e| &e.event) {
        Some(WorkflowEvent::WorkflowStarted {
            input,
            task_list,
            header,
            ..
        }) => (input.clone(), task_list.clone(), header.clone()),
        _ => return Err(DecisionError::MissingStartEvent),
    };

    let mut workflow = factory(input).map_err(DecisionError::InvalidInput)?;

    let mut driver = Driver {
        task,
        defaults,
        ctx: WorkflowContext::new(
            &task.workflow_id,
            &task.run_id,
            &task.workflow_type,
            task_list,
            execution,
        ),
        header,
        pending: HashMap::new(),
        commanded: HashSet::new(),
        close: None,
        decisions: Vec::new(),
    };

    for event in &task.history {
        driver.apply_event(workflow.as_mut(), event)?;
    }

    Ok(driver.finish())
}

impl Driver<'_> {
    fn apply_event(
        &mut self,
        workflow: &mut dyn AnyWorkflow,
        event: &HistoryEvent,
    ) -> Result<(), DecisionError> {
        let replaying = event.event_id <= self.task.previous_started_event_id;
        self.ctx.now = event.timestamp;
        self.ctx.replaying = replaying;
        trace!(
            event_id = event.event_id,
            event_type = event.event.event_type(),
            replaying,
            "Applying event"
        );

        let ctx = &self.ctx;
        let actions = match &event.event {
            WorkflowEvent::WorkflowStarted { .. } => workflow.on_start(ctx),

            WorkflowEvent::ActivityScheduled {
                activity_id,
                policy,
                ..
            } => {
                if !self.commanded.contains(activity_id) {
                    return Err(DecisionError::NonDeterministic {
                        activity_id: activity_id.clone(),
                    });
                }
                self.pending.insert(
                    activity_id.clone(),
                    PendingActivity {
                        wait_for_cancellation: policy.wait_for_cancellation,
                        cancel_requested: false,
                    },
                );
                return Ok(());
            }

            WorkflowEvent::ActivityCancelRequested { activity_id } => {
                if let Some(pending) = self.pending.get_mut(activity_id) {
                    pending.cancel_requested = true;
                }
                return Ok(());
            }

            WorkflowEvent::ActivityCompleted {
                activity_id,
                result,
            } => {
                self.pending.remove(activity_id);
                workflow.on_activity_completed(ctx, activity_id, result.clone())
            }

            WorkflowEvent::ActivityFailed { activity_id, error } => {
                self.pending.remove(activity_id);
                workflow.on_activity_failed(
                    ctx,
                    activity_id,
                    &ActivityFailure::Failed(error.clone()),
                )
            }

            WorkflowEvent::ActivityTimedOut {
                activity_id,
                timeout,
                ..
            } => {
                self.pending.remove(activity_id);
                workflow.on_activity_failed(
                    ctx,
                    activity_id,
                    &ActivityFailure::TimedOut(timeout.clone()),
                )
            }

            WorkflowEvent::ActivityCancelled {
                activity_id,
                details,
            } => {
                self.pending.remove(activity_id);
                workflow.on_activity_failed(
                    ctx,
                    activity_id,
                    &ActivityFailure::Cancelled {
                        details: details.clone(),
                    },
                )
            }

            WorkflowEvent::TimerFired { timer_id } => workflow.on_timer_fired(ctx, timer_id),

            WorkflowEvent::WorkflowCancelRequested { reason } => {
                if !replaying {
                    self.cancel_pending_activities();
                }
                workflow.on_cancel_requested(&self.ctx, reason)
            }

            _ => return Ok(()),
        };

        if self.close.is_some() {
            if !actions.is_empty() {
                debug!(
                    workflow_id = %self.task.workflow_id,
                    "Ignoring actions returned after the workflow closed"
                );
            }
            return Ok(());
        }

        for action in actions {
            self.apply_action(action, replaying)?;
            if self.close.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn apply_action(
        &mut self,
        action: WorkflowAction,
        replaying: bool,
    ) -> Result<(), DecisionError> {
        match action {
            WorkflowAction::ScheduleActivity {
                activity_id,
                activity_type,
                input,
                options,
            } => {
                if replaying {
                    self.commanded.insert(activity_id);
                    return Ok(());
                }
                if self.pending.contains_key(&activity_id) {
                    return Err(DecisionError::DuplicateActivityId(activity_id));
                }
                let policy = options
                    .merge(self.defaults)
                    .resolve(self.ctx.task_list())
                    .map_err(|source| DecisionError::InvalidActivityPolicy {
                        activity_id: activity_id.clone(),
                        source,
                    })?;

                self.commanded.insert(activity_id.clone());
                self.pending.insert(
                    activity_id.clone(),
                    PendingActivity {
                        wait_for_cancellation: policy.wait_for_cancellation,
                        cancel_requested: false,
                    },
                );
                self.decisions.push(Decision::ScheduleActivityTask {
                    activity_id,
                    activity_type,
                    input,
                    policy,
                    header: self.header.clone(),
                });
            }

            WorkflowAction::RequestCancelActivity { activity_id } => {
                match self.pending.get_mut(&activity_id) {
                    Some(pending) if !pending.cancel_requested => {
                        pending.cancel_requested = true;
                        if !replaying {
                            self.decisions
                                .push(Decision::RequestCancelActivityTask { activity_id });
                        }
                    }
                    Some(_) => {}
                    None if !replaying => {
                        warn!(
                            workflow_id = %self.task.workflow_id,
                            %activity_id,
                            "Cancel requested for an activity that is not pending"
                        );
                    }
                    None => {}
                }
            }

            WorkflowAction::StartTimer { timer_id, duration } => {
                if !replaying {
                    if let Err(source) = ConfigurationError::check_bounded("timer", duration) {
                        return Err(DecisionError::InvalidTimer { timer_id, source });
                    }
                    self.decisions
                        .push(Decision::StartTimer { timer_id, duration });
                }
            }

            terminal => {
                self.close = Some(terminal);
            }
        }
        Ok(())
    }

    fn cancel_pending_activities(&mut self) {
        let mut ids: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, pending)| !pending.cancel_requested)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        for activity_id in ids {
            if let Some(pending) = self.pending.get_mut(&activity_id) {
                pending.cancel_requested = true;
            }
            self.decisions
                .push(Decision::RequestCancelActivityTask { activity_id });
        }
    }

    fn finish(mut self) -> Vec<Decision> {
        match self.close.take() {
            Some(WorkflowAction::CancelWorkflow { details }) => {
                let waiting = self
                    .pending
                    .values()
                    .filter(|pending| pending.wait_for_cancellation)
                    .count();
                if waiting > 0 {
                    debug!(
                        workflow_id = %self.task.workflow_id,
                        waiting,
                        "Holding workflow cancellation until activities settle"
                    );
                } else {
                    self.decisions
                        .push(Decision::CancelWorkflowExecution { details });
                }
            }
            Some(WorkflowAction::CompleteWorkflow { result }) => {
                self.decisions
                    .push(Decision::CompleteWorkflowExecution { result });
            }
            Some(WorkflowAction::FailWorkflow { error }) => {
                self.decisions.push(Decision::FailWorkflowExecution { error });
            }
            Some(_) | None => {}
        }
        self.decisions
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::activity::{ActivityError, ActivityInvocationPolicy};
    use crate::reliability::{TimeoutError, TimeoutType};
    use crate::workflow::WorkflowError;

    /// Schedules one activity, completes with its result, fails on failure
    struct OneStep {
        input: String,
        options: ActivityOptions,
    }

    impl AnyWorkflow for OneStep {
        fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
            vec![WorkflowAction::schedule_activity_with_options(
                "0",
                "process_echo",
                json!(self.input),
                self.options.clone(),
            )]
        }

        fn on_activity_completed(
            &mut self,
            _ctx: &WorkflowContext,
            _activity_id: &str,
            result: Value,
        ) -> Vec<WorkflowAction> {
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

        fn on_timer_fired(
            &mut self,
            _ctx: &WorkflowContext,
            _timer_id: &str,
        ) -> Vec<WorkflowAction> {
            vec![]
        }

        fn on_cancel_requested(
            &mut self,
            _ctx: &WorkflowContext,
            reason: &str,
        ) -> Vec<WorkflowAction> {
            vec![WorkflowAction::cancel(Some(json!(reason)))]
        }
    }

    fn defaults() -> ActivityOptions {
        ActivityOptions::new()
            .with_schedule_to_close(Duration::from_secs(60))
            .with_heartbeat(Duration::from_secs(10))
    }

    fn policy(wait_for_cancellation: bool) -> ActivityInvocationPolicy {
        defaults()
            .with_wait_for_cancellation(wait_for_cancellation)
            .resolve("halfblood")
            .unwrap()
    }

    fn history(events: Vec<WorkflowEvent>) -> Vec<HistoryEvent> {
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| HistoryEvent {
                event_id: i as i64 + 1,
                timestamp: Utc::now(),
                event,
            })
            .collect()
    }

    fn started() -> WorkflowEvent {
        let mut header = Baggage::new();
        header.insert("tenant", "acme");
        WorkflowEvent::WorkflowStarted {
            workflow_type: "hello_world".into(),
            task_list: "halfblood".into(),
            input: json!("amar"),
            header,
            execution_timeout: Duration::from_secs(300),
            decision_timeout: Duration::from_secs(300),
        }
    }

    fn scheduled(wait_for_cancellation: bool) -> WorkflowEvent {
        WorkflowEvent::ActivityScheduled {
            activity_id: "0".into(),
            activity_type: "process_echo".into(),
            input: json!("amar"),
            policy: policy(wait_for_cancellation),
        }
    }

    fn completed_decision() -> WorkflowEvent {
        WorkflowEvent::DecisionTaskCompleted {
            identity: "worker-1".into(),
        }
    }

    fn task(events: Vec<WorkflowEvent>, previous_started_event_id: i64) -> DecisionTask {
        DecisionTask {
            task_token: "t".into(),
            workflow_id: "run-1".into(),
            run_id: "r".into(),
            workflow_type: "hello_world".into(),
            previous_started_event_id,
            attempt: 1,
            history: history(events),
        }
    }

    fn run(task: &DecisionTask, options: ActivityOptions) -> Result<Vec<Decision>, DecisionError> {
        drive(
            |input| {
                Ok(Box::new(OneStep {
                    input: serde_json::from_value(input)?,
                    options,
                }) as Box<dyn AnyWorkflow>)
            },
            &defaults(),
            task,
            ExecutionContext::background(),
        )
    }

    #[test]
    fn test_first_decision_schedules_with_header() {
        let decisions = run(&task(vec![started()], 0), ActivityOptions::new()).unwrap();

        assert_eq!(decisions.len(), 1);
        match &decisions[0] {
            Decision::ScheduleActivityTask {
                activity_id,
                policy,
                header,
                ..
            } => {
                assert_eq!(activity_id, "0");
                assert_eq!(policy.task_list, "halfblood");
                assert_eq!(policy.heartbeat, Some(Duration::from_secs(10)));
                assert_eq!(header.get("tenant"), Some("acme"));
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_completion_after_replay() {
        let task = task(
            vec![
                started(),
                completed_decision(),
                scheduled(false),
                WorkflowEvent::ActivityCompleted {
                    activity_id: "0".into(),
                    result: json!("Processed activity: amar"),
                },
            ],
            3,
        );

        let decisions = run(&task, ActivityOptions::new()).unwrap();
        assert_eq!(
            decisions,
            vec![Decision::CompleteWorkflowExecution {
                result: json!("Processed activity: amar")
            }]
        );
    }

    #[test]
    fn test_timeout_surfaces_as_failure() {
        let task = task(
            vec![
                started(),
                completed_decision(),
                scheduled(false),
                WorkflowEvent::ActivityTimedOut {
                    activity_id: "0".into(),
                    timeout: TimeoutError::new(TimeoutType::Heartbeat, Duration::from_secs(10)),
                    details: None,
                },
            ],
            3,
        );

        let decisions = run(&task, ActivityOptions::new()).unwrap();
        match &decisions[..] {
            [Decision::FailWorkflowExecution { error }] => {
                assert_eq!(error.code.as_deref(), Some("ACTIVITY_TIMED_OUT_HEARTBEAT"));
            }
            other => panic!("unexpected decisions {other:?}"),
        }
    }

    #[test]
    fn test_invalid_policy_fails_before_dispatch() {
        let options = ActivityOptions::new()
            .with_schedule_to_close(Duration::from_secs(10))
            .with_start_to_close(Duration::from_secs(60));

        let err = run(&task(vec![started()], 0), options).unwrap_err();
        assert!(matches!(err, DecisionError::InvalidActivityPolicy { .. }));
        assert_eq!(err.cause(), DecisionFailureCause::InvalidActivityPolicy);
        assert!(!err.to_failure().retryable);
    }

    #[test]
    fn test_out_of_range_timer_fails_decision() {
        struct Forever;

        impl AnyWorkflow for Forever {
            fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
                vec![WorkflowAction::timer("forever", Duration::MAX)]
            }

            fn on_activity_completed(
                &mut self,
                _ctx: &WorkflowContext,
                _activity_id: &str,
                _result: Value,
            ) -> Vec<WorkflowAction> {
                vec![]
            }

            fn on_activity_failed(
                &mut self,
                _ctx: &WorkflowContext,
                _activity_id: &str,
                _failure: &ActivityFailure,
            ) -> Vec<WorkflowAction> {
                vec![]
            }

            fn on_timer_fired(
                &mut self,
                _ctx: &WorkflowContext,
                _timer_id: &str,
            ) -> Vec<WorkflowAction> {
                vec![]
            }

            fn on_cancel_requested(
                &mut self,
                _ctx: &WorkflowContext,
                _reason: &str,
            ) -> Vec<WorkflowAction> {
                vec![]
            }
        }

        let err = drive(
            |_| Ok(Box::new(Forever) as Box<dyn AnyWorkflow>),
            &defaults(),
            &task(vec![started()], 0),
            ExecutionContext::background(),
        )
        .unwrap_err();
        assert!(matches!(err, DecisionError::InvalidTimer { .. }));
        assert_eq!(err.cause(), DecisionFailureCause::BadInput);
    }

    #[test]
    fn test_unexpected_schedule_is_non_deterministic() {
        let task = task(
            vec![
                started(),
                completed_decision(),
                WorkflowEvent::ActivityScheduled {
                    activity_id: "other".into(),
                    activity_type: "process_echo".into(),
                    input: json!("amar"),
                    policy: policy(false),
                },
            ],
            3,
        );

        let err = run(&task, ActivityOptions::new()).unwrap_err();
        assert!(matches!(err, DecisionError::NonDeterministic { .. }));
    }

    #[test]
    fn test_cancel_requests_pending_activity_then_closes() {
        let task = task(
            vec![
                started(),
                completed_decision(),
                scheduled(false),
                WorkflowEvent::WorkflowCancelRequested {
                    reason: "operator".into(),
                },
            ],
            3,
        );

        let decisions = run(&task, ActivityOptions::new()).unwrap();
        assert_eq!(
            decisions,
            vec![
                Decision::RequestCancelActivityTask {
                    activity_id: "0".into()
                },
                Decision::CancelWorkflowExecution {
                    details: Some(json!("operator"))
                },
            ]
        );
    }

    #[test]
    fn test_cancel_waits_for_activity_that_waits_for_cancellation() {
        let mut events = vec![
            started(),
            completed_decision(),
            scheduled(true),
            WorkflowEvent::WorkflowCancelRequested {
                reason: "operator".into(),
            },
        ];
        let decisions = run(&task(events.clone(), 3), ActivityOptions::new()).unwrap();
        assert_eq!(
            decisions,
            vec![Decision::RequestCancelActivityTask {
                activity_id: "0".into()
            }]
        );

        events.push(completed_decision());
        events.push(WorkflowEvent::ActivityCancelRequested {
            activity_id: "0".into(),
        });
        events.push(WorkflowEvent::ActivityCancelled {
            activity_id: "0".into(),
            details: None,
        });
        let decisions = run(&task(events, 6), ActivityOptions::new()).unwrap();
        assert_eq!(
            decisions,
            vec![Decision::CancelWorkflowExecution {
                details: Some(json!("operator"))
            }]
        );
    }

    #[test]
    fn test_missing_start_event() {
        let mut task = task(vec![started()], 0);
        task.history.clear();
        assert!(matches!(
            run(&task, ActivityOptions::new()),
            Err(DecisionError::MissingStartEvent)
        ));
    }

    #[test]
    fn test_bad_input() {
        let err = drive(
            |input| {
                let _: u32 = serde_json::from_value(input)?;
                unreachable!()
            },
            &defaults(),
            &task(vec![started()], 0),
            ExecutionContext::background(),
        )
        .unwrap_err();
        assert_eq!(err.cause(), DecisionFailureCause::BadInput);
    }

    #[test]
    fn test_failed_activity_error_reaches_workflow() {
        let task = task(
            vec![
                started(),
                completed_decision(),
                scheduled(false),
                WorkflowEvent::ActivityFailed {
                    activity_id: "0".into(),
                    error: ActivityError::non_retryable("boom").with_type("BOOM"),
                },
            ],
            3,
        );

        let decisions = run(&task, ActivityOptions::new()).unwrap();
        match &decisions[..] {
            [Decision::FailWorkflowExecution { error }] => {
                assert_eq!(error.code.as_deref(), Some("BOOM"))
            }
            other => panic!("unexpected decisions {other:?}"),
        }
    }
}
