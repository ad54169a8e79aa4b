//! Activity invocation policy
//!
//! [`ActivityOptions`] is the partial form a workflow supplies per call and as
//! its defaults. [`ActivityOptions::resolve`] fills in derived timeouts and
//! validates the result into an immutable [`ActivityInvocationPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::reliability::{AttemptTimeouts, RetryPolicy};
use crate::serde_util::{duration_millis, option_duration_millis};

/// Fraction of the heartbeat timeout after which a buffered heartbeat is sent
const HEARTBEAT_THROTTLE_RATIO: f64 = 0.8;

/// Per-call activity options; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    #[serde(default, with = "option_duration_millis")]
    pub schedule_to_close: Option<Duration>,

    #[serde(default, with = "option_duration_millis")]
    pub schedule_to_start: Option<Duration>,

    #[serde(default, with = "option_duration_millis")]
    pub start_to_close: Option<Duration>,

    #[serde(default, with = "option_duration_millis")]
    pub heartbeat: Option<Duration>,

    #[serde(default)]
    pub wait_for_cancellation: Option<bool>,

    #[serde(default)]
    pub task_list: Option<String>,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schedule_to_close(mut self, timeout: Duration) -> Self {
        self.schedule_to_close = Some(timeout);
        self
    }

    pub fn with_schedule_to_start(mut self, timeout: Duration) -> Self {
        self.schedule_to_start = Some(timeout);
        self
    }

    pub fn with_start_to_close(mut self, timeout: Duration) -> Self {
        self.start_to_close = Some(timeout);
        self
    }

    pub fn with_heartbeat(mut self, timeout: Duration) -> Self {
        self.heartbeat = Some(timeout);
        self
    }

    pub fn with_wait_for_cancellation(mut self, wait: bool) -> Self {
        self.wait_for_cancellation = Some(wait);
        self
    }

    pub fn with_task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = Some(task_list.into());
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Overlay `self` on `defaults`; fields set on `self` win
    pub fn merge(&self, defaults: &ActivityOptions) -> ActivityOptions {
        ActivityOptions {
            schedule_to_close: self.schedule_to_close.or(defaults.schedule_to_close),
            schedule_to_start: self.schedule_to_start.or(defaults.schedule_to_start),
            start_to_close: self.start_to_close.or(defaults.start_to_close),
            heartbeat: self.heartbeat.or(defaults.heartbeat),
            wait_for_cancellation: self
                .wait_for_cancellation
                .or(defaults.wait_for_cancellation),
            task_list: self.task_list.clone().or_else(|| defaults.task_list.clone()),
            retry_policy: self
                .retry_policy
                .clone()
                .or_else(|| defaults.retry_policy.clone()),
        }
    }

    /// Derive missing timeouts and validate
    ///
    /// - missing schedule_to_close = schedule_to_start + start_to_close
    /// - missing start_to_close = schedule_to_close
    /// - missing schedule_to_start = schedule_to_close
    /// - missing task list = `default_task_list`
    pub fn resolve(
        &self,
        default_task_list: &str,
    ) -> Result<ActivityInvocationPolicy, ConfigurationError> {
        let schedule_to_close = match (
            self.schedule_to_close,
            self.schedule_to_start,
            self.start_to_close,
        ) {
            (Some(s2c), _, _) => s2c,
            (None, Some(s2s), Some(stc)) => s2s.saturating_add(stc),
            _ => return Err(ConfigurationError::MissingTimeout),
        };

        let policy = ActivityInvocationPolicy {
            schedule_to_close,
            schedule_to_start: self.schedule_to_start.unwrap_or(schedule_to_close),
            start_to_close: self.start_to_close.unwrap_or(schedule_to_close),
            heartbeat: self.heartbeat,
            wait_for_cancellation: self.wait_for_cancellation.unwrap_or(false),
            task_list: self
                .task_list
                .clone()
                .unwrap_or_else(|| default_task_list.to_string()),
            retry_policy: self.retry_policy.clone(),
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Fully resolved policy governing one activity dispatch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityInvocationPolicy {
    #[serde(with = "duration_millis")]
    pub schedule_to_close: Duration,

    #[serde(with = "duration_millis")]
    pub schedule_to_start: Duration,

    #[serde(with = "duration_millis")]
    pub start_to_close: Duration,

    #[serde(default, with = "option_duration_millis")]
    pub heartbeat: Option<Duration>,

    pub wait_for_cancellation: bool,

    pub task_list: String,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityInvocationPolicy {
    /// Check the timeout ordering; violations are rejected, never truncated
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for (field, value) in [
            ("schedule_to_close", Some(self.schedule_to_close)),
            ("schedule_to_start", Some(self.schedule_to_start)),
            ("start_to_close", Some(self.start_to_close)),
            ("heartbeat", self.heartbeat),
        ] {
            match value {
                Some(Duration::ZERO) => return Err(ConfigurationError::ZeroDuration { field }),
                Some(value) => ConfigurationError::check_bounded(field, value)?,
                None => {}
            }
        }

        if self.schedule_to_close < self.start_to_close {
            return Err(ConfigurationError::ordering(
                "schedule_to_close",
                self.schedule_to_close,
                "start_to_close",
                self.start_to_close,
            ));
        }
        if self.schedule_to_close < self.schedule_to_start {
            return Err(ConfigurationError::ordering(
                "schedule_to_close",
                self.schedule_to_close,
                "schedule_to_start",
                self.schedule_to_start,
            ));
        }
        if let Some(heartbeat) = self.heartbeat {
            if heartbeat >= self.start_to_close {
                return Err(ConfigurationError::InvalidTimeoutOrdering(format!(
                    "heartbeat ({heartbeat:?}) must be less than start_to_close ({:?})",
                    self.start_to_close
                )));
            }
        }
        if self.task_list.trim().is_empty() {
            return Err(ConfigurationError::InvalidValue {
                field: "task_list",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(retry_policy) = &self.retry_policy {
            retry_policy.validate()?;
        }
        Ok(())
    }

    pub fn attempt_timeouts(&self) -> AttemptTimeouts {
        AttemptTimeouts {
            schedule_to_start: self.schedule_to_start,
            schedule_to_close: self.schedule_to_close,
            start_to_close: self.start_to_close,
            heartbeat: self.heartbeat,
        }
    }

    /// Minimum spacing between heartbeats forwarded to the engine
    pub fn heartbeat_throttle(&self) -> Option<Duration> {
        self.heartbeat
            .map(|heartbeat| heartbeat.mul_f64(HEARTBEAT_THROTTLE_RATIO))
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_policy
            .as_ref()
            .map_or(1, |policy| policy.max_attempts)
    }
}
