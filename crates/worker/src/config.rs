// Worker process configuration
// Decision: All settings come from the environment at process start and are immutable afterwards

use std::str::FromStr;

use mammoth_durable::service::ServiceConfig;
use mammoth_durable::worker::{FeatureFlags, WorkerConfig};
use uuid::Uuid;

use crate::workflows::TASK_LIST;

/// Configuration errors raised while reading the environment
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Configuration for the worker process
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Engine connection settings
    pub service: ServiceConfig,
    /// Task list the worker polls
    pub task_list: String,
    /// Identity reported to the engine
    pub worker_id: String,
    /// Start one hello-world execution after the worker is up
    pub start_workflow: bool,
    /// Input for that execution
    pub workflow_input: String,
    pub max_concurrent_activities: usize,
    pub max_concurrent_decisions: usize,
    pub feature_flags: FeatureFlags,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            task_list: TASK_LIST.to_string(),
            worker_id: format!("worker-{}", Uuid::now_v7()),
            start_workflow: true,
            workflow_input: "amar".to_string(),
            max_concurrent_activities: 10,
            max_concurrent_decisions: 10,
            feature_flags: FeatureFlags::default(),
        }
    }
}

impl AppConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let string = |var: &str, default: String| lookup(var).unwrap_or(default);

        Ok(Self {
            service: ServiceConfig::new(
                string("MAMMOTH_DOMAIN", defaults.service.domain),
                string("MAMMOTH_SERVICE_NAME", defaults.service.service_name),
                string("MAMMOTH_ENDPOINT", defaults.service.endpoint),
            ),
            task_list: string("MAMMOTH_TASK_LIST", defaults.task_list),
            worker_id: string("MAMMOTH_WORKER_ID", defaults.worker_id),
            start_workflow: parse(&lookup, "MAMMOTH_START_WORKFLOW", defaults.start_workflow)?,
            workflow_input: string("MAMMOTH_WORKFLOW_INPUT", defaults.workflow_input),
            max_concurrent_activities: parse(
                &lookup,
                "MAMMOTH_MAX_CONCURRENT_ACTIVITIES",
                defaults.max_concurrent_activities,
            )?,
            max_concurrent_decisions: parse(
                &lookup,
                "MAMMOTH_MAX_CONCURRENT_DECISIONS",
                defaults.max_concurrent_decisions,
            )?,
            feature_flags: FeatureFlags {
                workflow_execution_already_completed_error: parse(
                    &lookup,
                    "MAMMOTH_ALREADY_COMPLETED_ERROR",
                    defaults
                        .feature_flags
                        .workflow_execution_already_completed_error,
                )?,
            },
        })
    }

    /// Worker settings derived from this configuration
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::new(self.service.domain.clone(), self.task_list.clone())
            .with_identity(self.worker_id.clone())
            .with_max_concurrent_activity_tasks(self.max_concurrent_activities)
            .with_max_concurrent_decision_tasks(self.max_concurrent_decisions)
            .with_feature_flags(self.feature_flags)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.service, ServiceConfig::default());
        assert_eq!(config.task_list, "halfblood");
        assert!(config.worker_id.starts_with("worker-"));
        assert!(config.start_workflow);
        assert_eq!(config.workflow_input, "amar");
        assert!(config.feature_flags.workflow_execution_already_completed_error);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MAMMOTH_DOMAIN", "samples"),
            ("MAMMOTH_TASK_LIST", "echo"),
            ("MAMMOTH_WORKER_ID", "w-1"),
            ("MAMMOTH_START_WORKFLOW", "false"),
            ("MAMMOTH_MAX_CONCURRENT_ACTIVITIES", "4"),
            ("MAMMOTH_ALREADY_COMPLETED_ERROR", "false"),
        ]))
        .unwrap();

        assert_eq!(config.service.domain, "samples");
        assert!(!config.start_workflow);

        let worker = config.worker_config();
        assert_eq!(worker.domain, "samples");
        assert_eq!(worker.task_list, "echo");
        assert_eq!(worker.identity, "w-1");
        assert_eq!(worker.max_concurrent_activity_tasks, 4);
        assert!(!worker.feature_flags.workflow_execution_already_completed_error);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("MAMMOTH_MAX_CONCURRENT_DECISIONS", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "MAMMOTH_MAX_CONCURRENT_DECISIONS",
                ..
            }
        ));
    }
}
