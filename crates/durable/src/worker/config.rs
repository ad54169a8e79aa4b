//! Worker configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PollerConfig;
use crate::error::ConfigurationError;
use crate::serde_util::duration_millis;

/// Engine behaviors that can be switched per worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Report operations on closed executions as "already completed" rather
    /// than "not found"
    pub workflow_execution_already_completed_error: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            workflow_execution_already_completed_error: true,
        }
    }
}

/// Configuration for a [`Worker`](super::Worker)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Domain the worker polls in
    pub domain: String,

    /// Task list (worker group) to poll
    pub task_list: String,

    /// Identity reported to the engine
    pub identity: String,

    /// Poll backoff for both task kinds
    pub poller: PollerConfig,

    /// Decision tasks handled at once
    pub max_concurrent_decision_tasks: usize,

    /// Activity tasks handled at once
    pub max_concurrent_activity_tasks: usize,

    /// How long `stop` waits for in-flight tasks before cancelling them
    #[serde(with = "duration_millis")]
    pub stop_grace_period: Duration,

    /// Heartbeat spacing for activities whose policy has no heartbeat timeout
    #[serde(with = "duration_millis")]
    pub default_heartbeat_throttle: Duration,

    pub feature_flags: FeatureFlags,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            domain: "cadence-test".to_string(),
            task_list: "halfblood".to_string(),
            identity: format!("worker-{}", Uuid::now_v7()),
            poller: PollerConfig::default(),
            max_concurrent_decision_tasks: 10,
            max_concurrent_activity_tasks: 10,
            stop_grace_period: Duration::from_secs(10),
            default_heartbeat_throttle: Duration::from_secs(30),
            feature_flags: FeatureFlags::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(domain: impl Into<String>, task_list: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            ..Default::default()
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_max_concurrent_decision_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_decision_tasks = max.max(1);
        self
    }

    pub fn with_max_concurrent_activity_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_activity_tasks = max.max(1);
        self
    }

    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    pub fn with_default_heartbeat_throttle(mut self, throttle: Duration) -> Self {
        self.default_heartbeat_throttle = throttle;
        self
    }

    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    /// Check the fields the engine cannot default
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("domain", &self.domain),
            ("task_list", &self.task_list),
            ("identity", &self.identity),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigurationError::InvalidValue {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        for (field, value) in [
            ("max_concurrent_decision_tasks", self.max_concurrent_decision_tasks),
            ("max_concurrent_activity_tasks", self.max_concurrent_activity_tasks),
        ] {
            if value == 0 {
                return Err(ConfigurationError::InvalidValue {
                    field,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.default_heartbeat_throttle.is_zero() {
            return Err(ConfigurationError::ZeroDuration {
                field: "default_heartbeat_throttle",
            });
        }
        ConfigurationError::check_bounded("stop_grace_period", self.stop_grace_period)?;
        ConfigurationError::check_bounded(
            "default_heartbeat_throttle",
            self.default_heartbeat_throttle,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.domain, "cadence-test");
        assert_eq!(config.task_list, "halfblood");
        assert!(config.identity.starts_with("worker-"));
        assert!(config.feature_flags.workflow_execution_already_completed_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_clamps_concurrency() {
        let config = WorkerConfig::new("d", "tl")
            .with_max_concurrent_activity_tasks(0)
            .with_max_concurrent_decision_tasks(3);
        assert_eq!(config.max_concurrent_activity_tasks, 1);
        assert_eq!(config.max_concurrent_decision_tasks, 3);
    }

    #[test]
    fn test_empty_task_list_rejected() {
        let config = WorkerConfig::new("cadence-test", " ");
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue {
                field: "task_list",
                ..
            })
        ));
    }

    #[test]
    fn test_unbounded_grace_period_rejected() {
        let config = WorkerConfig::new("cadence-test", "halfblood")
            .with_stop_grace_period(Duration::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::DurationTooLong {
                field: "stop_grace_period",
                ..
            })
        ));
    }

    #[test]
    fn test_serialization_uses_millis() {
        let config = WorkerConfig::new("d", "tl").with_stop_grace_period(Duration::from_secs(2));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["stop_grace_period"], 2000);
        let parsed: WorkerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
