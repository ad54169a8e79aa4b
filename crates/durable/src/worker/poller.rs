//! Task polling with exponential backoff
//!
//! Polls are non-blocking on the engine side, so the worker paces itself:
//! the interval grows while polls come back empty and snaps back to the
//! minimum as soon as work shows up.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::serde_util::duration_millis;
use crate::service::{ActivityTask, DecisionTask, ServiceError, WorkflowService};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Minimum poll interval (when tasks are available)
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Maximum poll interval (when idle)
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no tasks found
    pub backoff_multiplier: f64,

    /// Maximum tasks to claim per poll
    pub batch_size: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            batch_size: 10,
        }
    }
}

impl PollerConfig {
    /// Create a new poller configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set minimum poll interval
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set maximum poll interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("poll failed: {0}")]
    Service(#[from] ServiceError),

    #[error("worker is shutting down")]
    Shutdown,
}

/// Polls one task list with adaptive backoff
pub(crate) struct TaskPoller {
    service: Arc<dyn WorkflowService>,
    domain: String,
    task_list: String,
    identity: String,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskPoller {
    pub(crate) fn new(
        service: Arc<dyn WorkflowService>,
        domain: String,
        task_list: String,
        identity: String,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            domain,
            task_list,
            identity,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    #[instrument(skip(self), fields(task_list = %self.task_list))]
    pub(crate) async fn poll_decisions(
        &mut self,
        max_tasks: usize,
    ) -> Result<Vec<DecisionTask>, PollerError> {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }
        let batch_size = max_tasks.min(self.config.batch_size);
        let tasks = self
            .service
            .poll_for_decision_task(&self.domain, &self.task_list, &self.identity, batch_size)
            .await;
        self.observe(tasks)
    }

    #[instrument(skip(self), fields(task_list = %self.task_list))]
    pub(crate) async fn poll_activities(
        &mut self,
        max_tasks: usize,
    ) -> Result<Vec<ActivityTask>, PollerError> {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }
        let batch_size = max_tasks.min(self.config.batch_size);
        let tasks = self
            .service
            .poll_for_activity_task(&self.domain, &self.task_list, &self.identity, batch_size)
            .await;
        self.observe(tasks)
    }

    fn observe<T>(
        &mut self,
        result: Result<Vec<T>, ServiceError>,
    ) -> Result<Vec<T>, PollerError> {
        match result {
            Ok(tasks) if tasks.is_empty() => {
                self.increase_backoff();
                trace!(
                    interval_ms = self.current_interval.as_millis(),
                    "No tasks found, backing off"
                );
                Ok(tasks)
            }
            Ok(tasks) => {
                self.reset_backoff();
                debug!(count = tasks.len(), "Claimed tasks");
                Ok(tasks)
            }
            Err(e) => {
                self.increase_backoff();
                Err(e.into())
            }
        }
    }

    /// Wait for the current backoff interval
    ///
    /// Returns true if shutdown was signaled while waiting.
    pub(crate) async fn wait(&mut self) -> bool {
        self.sleep(self.current_interval).await
    }

    /// Wait a fixed interval, returning true on shutdown
    pub(crate) async fn sleep(&mut self, interval: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => false,
            _ = self.shutdown_rx.changed() => {
                debug!("Shutdown signal received during wait");
                true
            }
        }
    }

    pub(crate) fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn reset_backoff(&mut self) {
        self.current_interval = self.config.min_interval;
    }

    fn increase_backoff(&mut self) {
        let new_interval = Duration::from_secs_f64(
            self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
        );
        self.current_interval = new_interval.min(self.config.max_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InMemoryWorkflowService;

    #[test]
    fn test_default_config() {
        let config = PollerConfig::default();
        assert_eq!(config.min_interval, Duration::from_millis(100));
        assert_eq!(config.max_interval, Duration::from_secs(5));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn test_config_builder() {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(50))
            .with_max_interval(Duration::from_secs(10))
            .with_backoff_multiplier(0.5)
            .with_batch_size(0);

        assert_eq!(config.min_interval, Duration::from_millis(50));
        assert_eq!(config.max_interval, Duration::from_secs(10));
        assert_eq!(config.backoff_multiplier, 1.0);
        assert_eq!(config.batch_size, 1);
    }

    fn poller(shutdown_rx: watch::Receiver<bool>) -> TaskPoller {
        let config = PollerConfig::new()
            .with_min_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_millis(300))
            .with_backoff_multiplier(2.0);
        TaskPoller::new(
            Arc::new(InMemoryWorkflowService::new().with_domain("cadence-test")),
            "cadence-test".to_string(),
            "halfblood".to_string(),
            "worker-1".to_string(),
            config,
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn test_empty_polls_back_off_to_cap() {
        let (_tx, rx) = watch::channel(false);
        let mut poller = poller(rx);

        assert!(poller.poll_activities(5).await.unwrap().is_empty());
        assert_eq!(poller.current_interval(), Duration::from_millis(200));
        assert!(poller.poll_decisions(5).await.unwrap().is_empty());
        assert_eq!(poller.current_interval(), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_unknown_domain_is_a_poll_error() {
        let (_tx, rx) = watch::channel(false);
        let mut poller = TaskPoller::new(
            Arc::new(InMemoryWorkflowService::new()),
            "missing".to_string(),
            "halfblood".to_string(),
            "worker-1".to_string(),
            PollerConfig::default(),
            rx,
        );
        assert!(matches!(
            poller.poll_decisions(1).await,
            Err(PollerError::Service(ServiceError::DomainNotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut poller = poller(rx);

        let waiter = tokio::spawn(async move { poller.sleep(Duration::from_secs(3600)).await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }
}
