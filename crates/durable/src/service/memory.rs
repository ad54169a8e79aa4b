//! In-memory orchestration engine
//!
//! Implements [`WorkflowService`] with the semantics the harness relies on:
//! history per run, one outstanding decision task per execution, activity
//! attempts with engine-side timeouts and retries, timers and cancellation.
//!
//! Timeouts are evaluated lazily: every call sweeps expired work before doing
//! anything else. All state sits behind one lock that is never held across an
//! await point.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::api::*;
use crate::activity::{ActivityFailure, ActivityInvocationPolicy};
use crate::context::Baggage;
use crate::error::ConfigurationError;
use crate::reliability::{AttemptClock, TimeoutError, TimeoutType};
use crate::workflow::{HistoryEvent, WorkflowError, WorkflowEvent};

enum DecisionState {
    Idle,
    Scheduled,
    Started { token: String, started_at: Instant },
}

struct ActivityState {
    activity_type: String,
    input: Value,
    policy: ActivityInvocationPolicy,
    header: Baggage,
    attempt: u32,
    first_scheduled_at: Instant,
    scheduled_at: DateTime<Utc>,
    clock: AttemptClock,
    /// Earliest instant the current attempt may be claimed
    ready_at: Instant,
    token: Option<String>,
    cancel_requested: bool,
    heartbeat_details: Option<Value>,
    seq: u64,
}

struct Execution {
    domain: String,
    workflow_id: String,
    run_id: String,
    workflow_type: String,
    task_list: String,
    execution_deadline: Instant,
    decision_timeout: Duration,
    start_time: DateTime<Utc>,
    close_time: Option<DateTime<Utc>>,
    status: WorkflowStatus,
    result: Option<Value>,
    error: Option<WorkflowError>,
    history: Vec<HistoryEvent>,
    /// Events that arrived while a decision task was in flight
    buffered: Vec<WorkflowEvent>,
    decision: DecisionState,
    decision_attempt: u32,
    previous_started_event_id: i64,
    activities: HashMap<String, ActivityState>,
    timers: HashMap<String, Instant>,
    cancel_requested: bool,
}

impl Execution {
    fn handle(&self) -> ExecutionHandle {
        ExecutionHandle {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
        }
    }

    fn is_open(&self) -> bool {
        !self.status.is_closed()
    }

    fn already_completed(&self) -> ServiceError {
        ServiceError::WorkflowExecutionAlreadyCompleted {
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
        }
    }

    fn append(&mut self, event: WorkflowEvent) {
        let event_id = self.history.len() as i64 + 1;
        self.history.push(HistoryEvent {
            event_id,
            timestamp: Utc::now(),
            event,
        });
    }

    /// Record an event, holding it back while a decision task is in flight
    fn record(&mut self, event: WorkflowEvent) {
        if matches!(self.decision, DecisionState::Started { .. }) {
            self.buffered.push(event);
            return;
        }
        let needs_decision = event.needs_decision();
        self.append(event);
        if needs_decision && matches!(self.decision, DecisionState::Idle) {
            self.decision = DecisionState::Scheduled;
        }
    }

    /// End the in-flight decision and replay held-back events
    fn release_decision(&mut self) {
        self.decision = DecisionState::Idle;
        for event in std::mem::take(&mut self.buffered) {
            self.record(event);
        }
    }

    fn close(&mut self, event: WorkflowEvent) {
        self.status = match &event {
            WorkflowEvent::WorkflowCompleted { result } => {
                self.result = Some(result.clone());
                WorkflowStatus::Completed
            }
            WorkflowEvent::WorkflowFailed { error } => {
                self.error = Some(error.clone());
                WorkflowStatus::Failed
            }
            WorkflowEvent::WorkflowCancelled { .. } => WorkflowStatus::Cancelled,
            _ => WorkflowStatus::TimedOut,
        };
        self.append(event);
        self.close_time = Some(Utc::now());
        self.decision = DecisionState::Idle;
        self.buffered.clear();
        self.activities.clear();
        self.timers.clear();
        info!(
            workflow_id = %self.workflow_id,
            run_id = %self.run_id,
            status = %self.status,
            "Workflow execution closed"
        );
    }

    /// Delay before retrying the current attempt, if the policy allows one
    fn retry_delay(
        activity: &ActivityState,
        error_type: Option<&str>,
        now: Instant,
    ) -> Option<Duration> {
        let policy = activity.policy.retry_policy.as_ref()?;
        policy.next_retry_delay(
            activity.attempt,
            error_type,
            now.saturating_duration_since(activity.first_scheduled_at),
        )
    }

    fn schedule_retry(&mut self, activity_id: &str, delay: Duration, now: Instant) {
        if let Some(activity) = self.activities.get_mut(activity_id) {
            activity.attempt += 1;
            activity.ready_at = now + delay;
            activity.clock = AttemptClock::scheduled(activity.ready_at);
            activity.token = None;
            debug!(
                workflow_id = %self.workflow_id,
                %activity_id,
                attempt = activity.attempt,
                ?delay,
                "Retrying activity"
            );
        }
    }

    /// Settle an activity attempt that ran out of time
    fn time_out_activity(&mut self, activity_id: &str, timeout: TimeoutError, now: Instant) {
        let Some(activity) = self.activities.get(activity_id) else {
            return;
        };
        let retryable = matches!(
            timeout.timeout_type,
            TimeoutType::StartToClose | TimeoutType::Heartbeat
        );
        if retryable && !activity.cancel_requested {
            if let Some(delay) = Self::retry_delay(activity, None, now) {
                self.schedule_retry(activity_id, delay, now);
                return;
            }
        }
        if let Some(activity) = self.activities.remove(activity_id) {
            info!(
                workflow_id = %self.workflow_id,
                %activity_id,
                timeout_type = %timeout.timeout_type,
                "Activity timed out"
            );
            self.record(WorkflowEvent::ActivityTimedOut {
                activity_id: activity_id.to_string(),
                timeout,
                details: activity.heartbeat_details,
            });
        }
    }

    fn sweep(&mut self, now: Instant) {
        if !self.is_open() {
            return;
        }
        if now >= self.execution_deadline {
            self.close(WorkflowEvent::WorkflowTimedOut);
            return;
        }

        if let DecisionState::Started { started_at, .. } = self.decision {
            if now.saturating_duration_since(started_at) >= self.decision_timeout {
                warn!(workflow_id = %self.workflow_id, "Decision task timed out");
                self.append(WorkflowEvent::DecisionTaskTimedOut);
                self.release_decision();
                self.decision = DecisionState::Scheduled;
            }
        }

        let mut fired: Vec<(Instant, String)> = self
            .timers
            .iter()
            .filter(|(_, fire_at)| **fire_at <= now)
            .map(|(id, fire_at)| (*fire_at, id.clone()))
            .collect();
        fired.sort();
        for (_, timer_id) in fired {
            self.timers.remove(&timer_id);
            self.record(WorkflowEvent::TimerFired { timer_id });
        }

        let mut expired: Vec<(u64, String, TimeoutError)> = self
            .activities
            .iter()
            .filter_map(|(id, activity)| {
                let timeout = activity
                    .clock
                    .expired(&activity.policy.attempt_timeouts(), now)?;
                Some((activity.seq, id.clone(), timeout))
            })
            .collect();
        expired.sort_by_key(|(seq, _, _)| *seq);
        for (_, activity_id, timeout) in expired {
            self.time_out_activity(&activity_id, timeout, now);
        }
    }
}

#[derive(Default)]
struct EngineState {
    domains: HashMap<String, DomainInfo>,
    executions: HashMap<String, Execution>,
    /// Latest run per (domain, workflow ID)
    current_runs: HashMap<(String, String), String>,
    decision_tokens: HashMap<String, String>,
    activity_tokens: HashMap<String, (String, String)>,
    seq: u64,
}

impl EngineState {
    fn sweep(&mut self, now: Instant) {
        for execution in self.executions.values_mut() {
            execution.sweep(now);
        }
    }

    fn require_domain(&self, domain: &str) -> Result<(), ServiceError> {
        if self.domains.contains_key(domain) {
            Ok(())
        } else {
            Err(ServiceError::DomainNotFound(domain.to_string()))
        }
    }

    fn find_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<&Execution, ServiceError> {
        self.require_domain(domain)?;
        let run_id = match run_id {
            Some(run_id) => run_id.to_string(),
            None => self
                .current_runs
                .get(&(domain.to_string(), workflow_id.to_string()))
                .cloned()
                .ok_or_else(|| ServiceError::EntityNotFound(format!("workflow {workflow_id}")))?,
        };
        self.executions
            .get(&run_id)
            .filter(|execution| execution.domain == domain && execution.workflow_id == workflow_id)
            .ok_or_else(|| ServiceError::EntityNotFound(format!("workflow {workflow_id}/{run_id}")))
    }

    /// Resolve a decision token to its open execution
    fn decision_execution(&mut self, task_token: &str) -> Result<&mut Execution, ServiceError> {
        let run_id = self
            .decision_tokens
            .get(task_token)
            .ok_or_else(|| ServiceError::EntityNotFound(format!("decision task {task_token}")))?;
        let execution = self
            .executions
            .get_mut(run_id)
            .ok_or_else(|| ServiceError::EntityNotFound(format!("decision task {task_token}")))?;
        if !execution.is_open() {
            return Err(execution.already_completed());
        }
        let current = matches!(
            &execution.decision,
            DecisionState::Started { token, .. } if token == task_token
        );
        if current {
            Ok(execution)
        } else {
            Err(ServiceError::EntityNotFound(format!(
                "decision task {task_token}"
            )))
        }
    }

    /// Resolve an activity token to its open execution and activity ID
    fn activity_execution(
        &mut self,
        task_token: &str,
    ) -> Result<(&mut Execution, String), ServiceError> {
        let not_found = || ServiceError::EntityNotFound(format!("activity task {task_token}"));
        let (run_id, activity_id) = self.activity_tokens.get(task_token).ok_or_else(not_found)?;
        let execution = self.executions.get_mut(run_id).ok_or_else(not_found)?;
        if !execution.is_open() {
            return Err(execution.already_completed());
        }
        let current = execution
            .activities
            .get(activity_id)
            .is_some_and(|activity| activity.token.as_deref() == Some(task_token));
        if current {
            Ok((execution, activity_id.clone()))
        } else {
            Err(not_found())
        }
    }
}

/// Reject a decision batch before any of it takes effect
fn validate_decisions(execution: &Execution, decisions: &[Decision]) -> Result<(), ServiceError> {
    let mut scheduled = Vec::new();
    for decision in decisions {
        match decision {
            Decision::ScheduleActivityTask {
                activity_id,
                policy,
                ..
            } => {
                if execution.activities.contains_key(activity_id)
                    || scheduled.contains(&activity_id)
                {
                    return Err(ServiceError::BadRequest(format!(
                        "activity id {activity_id} is already in use"
                    )));
                }
                policy.validate().map_err(|e| {
                    ServiceError::BadRequest(format!(
                        "invalid policy for activity {activity_id}: {e}"
                    ))
                })?;
                scheduled.push(activity_id);
            }
            Decision::StartTimer { timer_id, duration } => {
                ConfigurationError::check_bounded("timer duration", *duration).map_err(|e| {
                    ServiceError::BadRequest(format!("invalid timer {timer_id}: {e}"))
                })?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// In-memory implementation of [`WorkflowService`]
///
/// Intended for tests and local development; state is lost when dropped.
///
/// # Example
///
/// ```
/// use mammoth_durable::InMemoryWorkflowService;
///
/// let service = InMemoryWorkflowService::new().with_domain("cadence-test");
/// ```
pub struct InMemoryWorkflowService {
    state: Mutex<EngineState>,
}

impl InMemoryWorkflowService {
    /// Create an engine with no domains
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Register a domain (builder form)
    pub fn with_domain(self, name: impl Into<String>) -> Self {
        self.register_domain(name);
        self
    }

    /// Register a domain
    pub fn register_domain(&self, name: impl Into<String>) {
        let name = name.into();
        self.state.lock().domains.insert(
            name.clone(),
            DomainInfo {
                description: format!("in-memory domain {name}"),
                name,
            },
        );
    }

    /// Number of runs, open or closed
    pub fn execution_count(&self) -> usize {
        self.state.lock().executions.len()
    }

    /// Number of activities waiting for or running an attempt
    pub fn pending_activity_count(&self) -> usize {
        self.state
            .lock()
            .executions
            .values()
            .map(|execution| execution.activities.len())
            .sum()
    }

    fn locked(&self) -> parking_lot::MutexGuard<'_, EngineState> {
        let mut state = self.state.lock();
        state.sweep(Instant::now());
        state
    }
}

impl Default for InMemoryWorkflowService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowService for InMemoryWorkflowService {
    // =========================================================================
    // Domain and Execution Operations
    // =========================================================================

    async fn describe_domain(&self, domain: &str) -> Result<DomainInfo, ServiceError> {
        self.locked()
            .domains
            .get(domain)
            .cloned()
            .ok_or_else(|| ServiceError::DomainNotFound(domain.to_string()))
    }

    #[instrument(
        skip(self, request),
        fields(workflow_id = %request.workflow_id, workflow_type = %request.workflow_type)
    )]
    async fn start_workflow_execution(
        &self,
        request: StartWorkflowRequest,
    ) -> Result<ExecutionHandle, ServiceError> {
        if request.workflow_id.is_empty()
            || request.workflow_type.is_empty()
            || request.task_list.is_empty()
        {
            return Err(ServiceError::BadRequest(
                "workflow id, type and task list are required".to_string(),
            ));
        }
        if request.execution_timeout.is_zero() || request.decision_timeout.is_zero() {
            return Err(ServiceError::BadRequest(
                "execution and decision timeouts must be positive".to_string(),
            ));
        }
        for (field, value) in [
            ("execution_timeout", request.execution_timeout),
            ("decision_timeout", request.decision_timeout),
        ] {
            ConfigurationError::check_bounded(field, value)
                .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
        }

        let mut state = self.locked();
        state.require_domain(&request.domain)?;

        let key = (request.domain.clone(), request.workflow_id.clone());
        if let Some(run_id) = state.current_runs.get(&key) {
            if state.executions.get(run_id).is_some_and(Execution::is_open) {
                return Err(ServiceError::WorkflowExecutionAlreadyStarted {
                    workflow_id: request.workflow_id,
                    run_id: run_id.clone(),
                });
            }
        }

        let now = Instant::now();
        let execution_deadline = now.checked_add(request.execution_timeout).ok_or_else(|| {
            ServiceError::BadRequest("execution timeout is out of range".to_string())
        })?;
        let run_id = Uuid::now_v7().to_string();
        let mut execution = Execution {
            domain: request.domain,
            workflow_id: request.workflow_id,
            run_id: run_id.clone(),
            workflow_type: request.workflow_type.clone(),
            task_list: request.task_list.clone(),
            execution_deadline,
            decision_timeout: request.decision_timeout,
            start_time: Utc::now(),
            close_time: None,
            status: WorkflowStatus::Running,
            result: None,
            error: None,
            history: Vec::new(),
            buffered: Vec::new(),
            decision: DecisionState::Idle,
            decision_attempt: 0,
            previous_started_event_id: 0,
            activities: HashMap::new(),
            timers: HashMap::new(),
            cancel_requested: false,
        };
        execution.record(WorkflowEvent::WorkflowStarted {
            workflow_type: request.workflow_type,
            task_list: request.task_list,
            input: request.input,
            header: request.header,
            execution_timeout: request.execution_timeout,
            decision_timeout: request.decision_timeout,
        });

        let handle = execution.handle();
        state.current_runs.insert(key, run_id.clone());
        state.executions.insert(run_id, execution);
        debug!(%handle, identity = %request.identity, "Workflow execution started");
        Ok(handle)
    }

    async fn request_cancel_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
        reason: &str,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let run_id = state.find_execution(domain, workflow_id, run_id)?.run_id.clone();
        let Some(execution) = state.executions.get_mut(&run_id) else {
            return Err(ServiceError::EntityNotFound(format!("workflow {workflow_id}")));
        };
        if !execution.is_open() {
            return Err(execution.already_completed());
        }
        if !execution.cancel_requested {
            execution.cancel_requested = true;
            execution.record(WorkflowEvent::WorkflowCancelRequested {
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn describe_workflow_execution(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<ExecutionInfo, ServiceError> {
        let state = self.locked();
        let execution = state.find_execution(domain, workflow_id, run_id)?;
        Ok(ExecutionInfo {
            handle: execution.handle(),
            workflow_type: execution.workflow_type.clone(),
            task_list: execution.task_list.clone(),
            status: execution.status,
            start_time: execution.start_time,
            close_time: execution.close_time,
            result: execution.result.clone(),
            error: execution.error.clone(),
            history_length: execution.history.len() as i64,
        })
    }

    async fn get_workflow_execution_history(
        &self,
        domain: &str,
        workflow_id: &str,
        run_id: Option<&str>,
    ) -> Result<Vec<HistoryEvent>, ServiceError> {
        let state = self.locked();
        Ok(state.find_execution(domain, workflow_id, run_id)?.history.clone())
    }

    // =========================================================================
    // Decision Task Operations
    // =========================================================================

    async fn poll_for_decision_task(
        &self,
        domain: &str,
        task_list: &str,
        _identity: &str,
        max_tasks: usize,
    ) -> Result<Vec<DecisionTask>, ServiceError> {
        let mut state = self.locked();
        state.require_domain(domain)?;

        let mut ready: Vec<(DateTime<Utc>, String)> = state
            .executions
            .values()
            .filter(|execution| {
                execution.is_open()
                    && execution.domain == domain
                    && execution.task_list == task_list
                    && matches!(execution.decision, DecisionState::Scheduled)
            })
            .map(|execution| (execution.start_time, execution.run_id.clone()))
            .collect();
        ready.sort();

        let now = Instant::now();
        let mut tasks = Vec::new();
        for (_, run_id) in ready.into_iter().take(max_tasks) {
            let token = Uuid::now_v7().to_string();
            let Some(execution) = state.executions.get_mut(&run_id) else {
                continue;
            };
            execution.decision = DecisionState::Started {
                token: token.clone(),
                started_at: now,
            };
            execution.decision_attempt += 1;
            tasks.push(DecisionTask {
                task_token: token.clone(),
                workflow_id: execution.workflow_id.clone(),
                run_id: run_id.clone(),
                workflow_type: execution.workflow_type.clone(),
                previous_started_event_id: execution.previous_started_event_id,
                attempt: execution.decision_attempt,
                history: execution.history.clone(),
            });
            state.decision_tokens.insert(token, run_id);
        }
        Ok(tasks)
    }

    async fn respond_decision_task_completed(
        &self,
        task_token: &str,
        decisions: Vec<Decision>,
        identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let seq_base = state.seq;
        let execution = state.decision_execution(task_token)?;
        validate_decisions(execution, &decisions)?;

        let now = Instant::now();
        execution.decision_attempt = 0;
        execution.append(WorkflowEvent::DecisionTaskCompleted {
            identity: identity.to_string(),
        });

        let mut follow_up = Vec::new();
        let mut close = None;
        let mut scheduled = 0;
        for decision in decisions {
            match decision {
                Decision::ScheduleActivityTask {
                    activity_id,
                    activity_type,
                    input,
                    policy,
                    header,
                } => {
                    scheduled += 1;
                    execution.append(WorkflowEvent::ActivityScheduled {
                        activity_id: activity_id.clone(),
                        activity_type: activity_type.clone(),
                        input: input.clone(),
                        policy: policy.clone(),
                    });
                    execution.activities.insert(
                        activity_id,
                        ActivityState {
                            activity_type,
                            input,
                            policy,
                            header,
                            attempt: 1,
                            first_scheduled_at: now,
                            scheduled_at: Utc::now(),
                            clock: AttemptClock::scheduled(now),
                            ready_at: now,
                            token: None,
                            cancel_requested: false,
                            heartbeat_details: None,
                            seq: seq_base + scheduled,
                        },
                    );
                }
                Decision::RequestCancelActivityTask { activity_id } => {
                    let Some(activity) = execution.activities.get_mut(&activity_id) else {
                        debug!(%activity_id, "Cancel requested for unknown activity");
                        continue;
                    };
                    if activity.token.is_some() {
                        activity.cancel_requested = true;
                        execution.append(WorkflowEvent::ActivityCancelRequested { activity_id });
                    } else {
                        execution.activities.remove(&activity_id);
                        execution.append(WorkflowEvent::ActivityCancelRequested {
                            activity_id: activity_id.clone(),
                        });
                        follow_up.push(WorkflowEvent::ActivityCancelled {
                            activity_id,
                            details: None,
                        });
                    }
                }
                Decision::StartTimer { timer_id, duration } => {
                    execution.timers.insert(timer_id.clone(), now + duration);
                    execution.append(WorkflowEvent::TimerStarted { timer_id, duration });
                }
                Decision::CompleteWorkflowExecution { result } => {
                    close = Some(WorkflowEvent::WorkflowCompleted { result });
                    break;
                }
                Decision::FailWorkflowExecution { error } => {
                    close = Some(WorkflowEvent::WorkflowFailed { error });
                    break;
                }
                Decision::CancelWorkflowExecution { details } => {
                    close = Some(WorkflowEvent::WorkflowCancelled { details });
                    break;
                }
            }
        }

        if let Some(event) = close {
            execution.close(event);
        } else {
            execution.previous_started_event_id = execution.history.len() as i64;
            execution.release_decision();
            for event in follow_up {
                execution.record(event);
            }
        }
        state.seq = seq_base + scheduled;
        state.decision_tokens.remove(task_token);
        Ok(())
    }

    async fn respond_decision_task_failed(
        &self,
        task_token: &str,
        failure: DecisionFailure,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let execution = state.decision_execution(task_token)?;
        warn!(
            workflow_id = %execution.workflow_id,
            cause = %failure.cause,
            message = %failure.message,
            "Decision task failed"
        );

        execution.append(WorkflowEvent::DecisionTaskFailed {
            cause: failure.cause.to_string(),
            message: failure.message.clone(),
        });
        if failure.retryable {
            execution.release_decision();
            execution.decision = DecisionState::Scheduled;
        } else {
            execution.close(WorkflowEvent::WorkflowFailed {
                error: WorkflowError::new(failure.message).with_code(failure.cause.to_string()),
            });
        }
        state.decision_tokens.remove(task_token);
        Ok(())
    }

    // =========================================================================
    // Activity Task Operations
    // =========================================================================

    async fn poll_for_activity_task(
        &self,
        domain: &str,
        task_list: &str,
        identity: &str,
        max_tasks: usize,
    ) -> Result<Vec<ActivityTask>, ServiceError> {
        let mut state = self.locked();
        state.require_domain(domain)?;
        let now = Instant::now();

        let mut ready: Vec<(u64, String, String)> = state
            .executions
            .values()
            .filter(|execution| execution.is_open() && execution.domain == domain)
            .flat_map(|execution| {
                execution
                    .activities
                    .iter()
                    .filter(move |(_, activity)| {
                        activity.policy.task_list == task_list
                            && activity.token.is_none()
                            && !activity.cancel_requested
                            && activity.ready_at <= now
                    })
                    .map(move |(id, activity)| {
                        (activity.seq, execution.run_id.clone(), id.clone())
                    })
            })
            .collect();
        ready.sort();

        let mut tasks = Vec::new();
        for (_, run_id, activity_id) in ready.into_iter().take(max_tasks) {
            let token = Uuid::now_v7().to_string();
            let Some(execution) = state.executions.get_mut(&run_id) else {
                continue;
            };
            let Some(activity) = execution.activities.get_mut(&activity_id) else {
                continue;
            };
            activity.token = Some(token.clone());
            activity.clock.started_at = Some(now);
            activity.clock.last_heartbeat_at = None;

            let task = ActivityTask {
                task_token: token.clone(),
                workflow_id: execution.workflow_id.clone(),
                run_id: run_id.clone(),
                workflow_type: execution.workflow_type.clone(),
                activity_id: activity_id.clone(),
                activity_type: activity.activity_type.clone(),
                input: activity.input.clone(),
                attempt: activity.attempt,
                scheduled_at: activity.scheduled_at,
                started_at: Utc::now(),
                policy: activity.policy.clone(),
                header: activity.header.clone(),
                heartbeat_details: activity.heartbeat_details.clone(),
            };
            let attempt = activity.attempt;
            execution.record(WorkflowEvent::ActivityStarted {
                activity_id: activity_id.clone(),
                attempt,
                identity: identity.to_string(),
            });
            state.activity_tokens.insert(token, (run_id, activity_id));
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn record_activity_task_heartbeat(
        &self,
        task_token: &str,
        details: Option<Value>,
        _identity: &str,
    ) -> Result<HeartbeatResponse, ServiceError> {
        let mut state = self.locked();
        let (execution, activity_id) = state.activity_execution(task_token)?;
        let Some(activity) = execution.activities.get_mut(&activity_id) else {
            return Err(ServiceError::EntityNotFound(format!("activity task {task_token}")));
        };
        activity.clock.last_heartbeat_at = Some(Instant::now());
        if details.is_some() {
            activity.heartbeat_details = details;
        }
        Ok(HeartbeatResponse {
            cancel_requested: activity.cancel_requested,
        })
    }

    async fn respond_activity_task_completed(
        &self,
        task_token: &str,
        result: Value,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let (execution, activity_id) = state.activity_execution(task_token)?;
        execution.activities.remove(&activity_id);
        execution.record(WorkflowEvent::ActivityCompleted {
            activity_id,
            result,
        });
        state.activity_tokens.remove(task_token);
        Ok(())
    }

    async fn respond_activity_task_failed(
        &self,
        task_token: &str,
        failure: ActivityFailure,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let now = Instant::now();
        let (execution, activity_id) = state.activity_execution(task_token)?;

        match failure {
            ActivityFailure::Failed(error) => {
                let retry = execution
                    .activities
                    .get(&activity_id)
                    .filter(|activity| error.retryable && !activity.cancel_requested)
                    .and_then(|activity| {
                        Execution::retry_delay(activity, error.error_type.as_deref(), now)
                    });
                match retry {
                    Some(delay) => execution.schedule_retry(&activity_id, delay, now),
                    None => {
                        execution.activities.remove(&activity_id);
                        execution.record(WorkflowEvent::ActivityFailed { activity_id, error });
                    }
                }
            }
            ActivityFailure::TimedOut(timeout) => {
                execution.time_out_activity(&activity_id, timeout, now);
            }
            ActivityFailure::Cancelled { details } => {
                execution.activities.remove(&activity_id);
                execution.record(WorkflowEvent::ActivityCancelled {
                    activity_id,
                    details,
                });
            }
        }
        state.activity_tokens.remove(task_token);
        Ok(())
    }

    async fn respond_activity_task_canceled(
        &self,
        task_token: &str,
        details: Option<Value>,
        _identity: &str,
    ) -> Result<(), ServiceError> {
        let mut state = self.locked();
        let (execution, activity_id) = state.activity_execution(task_token)?;
        execution.activities.remove(&activity_id);
        execution.record(WorkflowEvent::ActivityCancelled {
            activity_id,
            details,
        });
        state.activity_tokens.remove(task_token);
        Ok(())
    }
}
