//! Worker lifecycle
//!
//! A [`Worker`] owns one [`Registry`] and drives it through
//! `Unbound → Starting → Polling → Stopping → Stopped`. Setup failures move it
//! to `Failed` and are returned to the caller; per-task failures are reported
//! to the engine and never leave `Polling`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::activity_task::ActivityTaskRunner;
use super::decision_task::DecisionTaskRunner;
use super::poller::{PollerError, TaskPoller};
use super::WorkerConfig;
use crate::context::{default_propagators, ContextPropagator};
use crate::engine::{DispatchTable, Registry};
use crate::error::{ConfigurationError, ConnectionError};
use crate::service::{DecisionTask, ServiceError, WorkflowService};

/// Interval between drain checks during `stop`
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, registry not yet bound
    Unbound,
    /// Handshaking with the engine and binding the registry
    Starting,
    /// Poll loops are claiming tasks
    Polling,
    /// No new claims, draining in-flight tasks
    Stopping,
    /// Poll loops have exited
    Stopped,
    /// Setup failed; terminal
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unbound => "unbound",
            Self::Starting => "starting",
            Self::Polling => "polling",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Worker setup errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// `start` called outside the `Unbound` state
    #[error("cannot start worker in state {0}")]
    InvalidState(WorkerState),
}

/// Polls one task list and dispatches claimed tasks to registered handlers
pub struct Worker {
    service: Arc<dyn WorkflowService>,
    config: WorkerConfig,
    registry: Mutex<Registry>,
    propagators: Vec<Arc<dyn ContextPropagator>>,
    state: RwLock<WorkerState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    /// Parent of every task context; cancelled when the stop grace period ends
    root: CancellationToken,
    decision_slots: Arc<Semaphore>,
    activity_slots: Arc<Semaphore>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        service: Arc<dyn WorkflowService>,
        config: WorkerConfig,
        registry: Registry,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            service,
            decision_slots: Arc::new(Semaphore::new(config.max_concurrent_decision_tasks)),
            activity_slots: Arc::new(Semaphore::new(config.max_concurrent_activity_tasks)),
            config,
            registry: Mutex::new(registry),
            propagators: default_propagators(),
            state: RwLock::new(WorkerState::Unbound),
            shutdown_tx,
            shutdown_rx,
            root: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Replace the propagators used to restore task contexts
    pub fn with_propagators(mut self, propagators: Vec<Arc<dyn ContextPropagator>>) -> Self {
        self.propagators = propagators;
        self
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Tasks currently being handled across both task kinds
    pub fn in_flight_tasks(&self) -> usize {
        let decisions =
            self.config.max_concurrent_decision_tasks - self.decision_slots.available_permits();
        let activities =
            self.config.max_concurrent_activity_tasks - self.activity_slots.available_permits();
        decisions + activities
    }

    /// Handshake with the engine, bind the registry and start polling
    ///
    /// Fails with [`ConfigurationError::AlreadyBound`] if the registry was
    /// bound before, leaving the state untouched. Any other failure moves the
    /// worker to [`WorkerState::Failed`].
    #[instrument(
        skip(self),
        fields(
            domain = %self.config.domain,
            task_list = %self.config.task_list,
            identity = %self.config.identity,
        )
    )]
    pub async fn start(&self) -> Result<(), WorkerError> {
        if self.registry.lock().is_bound() {
            return Err(ConfigurationError::AlreadyBound.into());
        }
        {
            let mut state = self.state.write();
            if *state != WorkerState::Unbound {
                return Err(WorkerError::InvalidState(*state));
            }
            *state = WorkerState::Starting;
        }

        match self.bring_up().await {
            Ok(()) => {
                *self.state.write() = WorkerState::Polling;
                info!("Worker polling");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = WorkerState::Failed;
                error!(error = %e, "Worker failed to start");
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<(), WorkerError> {
        self.config.validate()?;

        let domain = self
            .service
            .describe_domain(&self.config.domain)
            .await
            .map_err(|e| match e {
                ServiceError::DomainNotFound(domain) => ConnectionError::DomainNotFound(domain),
                other => ConnectionError::Handshake(other),
            })?;
        debug!(domain = %domain.name, "Engine handshake complete");

        let table = Arc::new(self.registry.lock().bind()?);
        info!(
            workflows = ?table.workflow_names().collect::<Vec<_>>(),
            activities = ?table.activity_names().collect::<Vec<_>>(),
            "Registry bound"
        );

        let mut loops = Vec::new();
        if table.has_workflows() {
            loops.push(self.spawn_decision_loop(Arc::clone(&table)));
        }
        if table.has_activities() {
            loops.push(self.spawn_activity_loop(table));
        }
        if loops.is_empty() {
            warn!("No handlers registered, worker will not poll");
        }
        self.loops.lock().extend(loops);
        Ok(())
    }

    /// Stop claiming tasks and drain the ones in flight
    ///
    /// Tasks still running when the grace period ends have their contexts
    /// cancelled. A worker that is not polling is left as is.
    #[instrument(skip(self), fields(identity = %self.config.identity))]
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            let current = *state;
            if current != WorkerState::Polling {
                debug!(state = %current, "Worker is not polling, nothing to stop");
                return;
            }
            *state = WorkerState::Stopping;
        }

        info!("Stopping worker");
        let _ = self.shutdown_tx.send(true);

        let draining_since = tokio::time::Instant::now();
        loop {
            let in_flight = self.in_flight_tasks();
            if in_flight == 0 {
                debug!("All tasks drained");
                break;
            }
            if draining_since.elapsed() >= self.config.stop_grace_period {
                warn!(in_flight, "Grace period elapsed, cancelling remaining tasks");
                break;
            }
            tokio::time::sleep(DRAIN_CHECK_INTERVAL).await;
        }
        self.root.cancel();

        let loops = std::mem::take(&mut *self.loops.lock());
        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "Poll loop terminated abnormally");
            }
        }

        *self.state.write() = WorkerState::Stopped;
        info!("Worker stopped");
    }

    fn poller(&self) -> TaskPoller {
        TaskPoller::new(
            Arc::clone(&self.service),
            self.config.domain.clone(),
            self.config.task_list.clone(),
            self.config.identity.clone(),
            self.config.poller.clone(),
            self.shutdown_rx.clone(),
        )
    }

    fn spawn_decision_loop(&self, table: Arc<DispatchTable>) -> JoinHandle<()> {
        let runner = Arc::new(DecisionTaskRunner {
            service: Arc::clone(&self.service),
            table,
            identity: self.config.identity.clone(),
            propagators: self.propagators.clone(),
            root: self.root.clone(),
            feature_flags: self.config.feature_flags,
        });
        let slots = Arc::clone(&self.decision_slots);
        let mut poller = self.poller();

        tokio::spawn(async move {
            loop {
                let available = slots.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll_decisions(available).await {
                    Ok(tasks) => {
                        for batch in group_by_execution(tasks) {
                            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                                break;
                            };
                            let runner = Arc::clone(&runner);
                            tokio::spawn(async move {
                                runner.handle_all(batch).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(PollerError::Shutdown) => break,
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_in_ms = poller.current_interval().as_millis(),
                            "Decision poll failed"
                        );
                    }
                }

                if poller.wait().await {
                    break;
                }
            }
            debug!("Decision poll loop exited");
        })
    }

    fn spawn_activity_loop(&self, table: Arc<DispatchTable>) -> JoinHandle<()> {
        let runner = Arc::new(ActivityTaskRunner {
            service: Arc::clone(&self.service),
            table,
            identity: self.config.identity.clone(),
            propagators: self.propagators.clone(),
            root: self.root.clone(),
            default_heartbeat_throttle: self.config.default_heartbeat_throttle,
            feature_flags: self.config.feature_flags,
        });
        let slots = Arc::clone(&self.activity_slots);
        let mut poller = self.poller();

        tokio::spawn(async move {
            loop {
                let available = slots.available_permits();
                if available == 0 {
                    if poller.wait().await {
                        break;
                    }
                    continue;
                }

                match poller.poll_activities(available).await {
                    Ok(tasks) => {
                        for task in tasks {
                            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                                break;
                            };
                            let runner = Arc::clone(&runner);
                            tokio::spawn(async move {
                                runner.handle(task).await;
                                drop(permit);
                            });
                        }
                    }
                    Err(PollerError::Shutdown) => break,
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_in_ms = poller.current_interval().as_millis(),
                            "Activity poll failed"
                        );
                    }
                }

                if poller.wait().await {
                    break;
                }
            }
            debug!("Activity poll loop exited");
        })
    }
}

/// Split a poll result into per-execution batches, keeping delivery order
fn group_by_execution(tasks: Vec<DecisionTask>) -> Vec<Vec<DecisionTask>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut batches: Vec<Vec<DecisionTask>> = Vec::new();
    for task in tasks {
        match index.get(&task.workflow_id) {
            Some(&i) => batches[i].push(task),
            None => {
                index.insert(task.workflow_id.clone(), batches.len());
                batches.push(vec![task]);
            }
        }
    }
    batches
}
