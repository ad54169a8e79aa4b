//! Activity retry policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::serde_util::{duration_millis, option_duration_millis};

/// Retry configuration attached to an activity invocation
///
/// Retries are performed by the engine: when an attempt fails with a
/// retryable error or times out, the engine schedules the next attempt after
/// [`delay_for_attempt`](Self::delay_for_attempt). Heartbeat details recorded
/// by the failed attempt are handed to the next one.
///
/// # Example
///
/// ```
/// use mammoth_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_initial_interval(Duration::from_secs(1))
///     .with_max_interval(Duration::from_secs(60));
///
/// assert!(policy.has_attempts_remaining(4));
/// assert!(!policy.has_attempts_remaining(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Initial delay before first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,

    /// Total time budget across all attempts, measured from first scheduling
    #[serde(default, with = "option_duration_millis")]
    pub expiration: Option<Duration>,

    /// Error types that should NOT be retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 5 attempts, 1s initial, 60s cap, 2x, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            expiration: None,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            expiration: None,
            non_retryable_errors: vec![],
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            expiration: None,
            non_retryable_errors: vec![],
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Bound the total time spent across all attempts
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Add a non-retryable error type
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Reject policies the engine cannot honour
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry_policy.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.backoff_coefficient < 1.0 {
            return Err(ConfigurationError::InvalidValue {
                field: "retry_policy.backoff_coefficient",
                reason: format!("{} is below 1.0", self.backoff_coefficient),
            });
        }
        if self.max_interval < self.initial_interval {
            return Err(ConfigurationError::ordering(
                "retry_policy.max_interval",
                self.max_interval,
                "retry_policy.initial_interval",
                self.initial_interval,
            ));
        }
        ConfigurationError::check_bounded("retry_policy.max_interval", self.max_interval)?;
        match self.expiration {
            Some(Duration::ZERO) => Err(ConfigurationError::ZeroDuration {
                field: "retry_policy.expiration",
            }),
            Some(expiration) => {
                ConfigurationError::check_bounded("retry_policy.expiration", expiration)
            }
            None => Ok(()),
        }
    }

    /// Calculate delay for a given attempt number (1-based)
    ///
    /// Returns the duration to wait before the attempt is scheduled.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter_range = capped * self.jitter;
            let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
            (capped + jitter_offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Check if an error type should be retried
    pub fn should_retry(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|e| e == error_type),
            None => true,
        }
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Delay before the next attempt, or `None` when retries are exhausted
    ///
    /// `elapsed` is the time since the activity was first scheduled; the
    /// next attempt is refused if it would start after the expiration.
    pub fn next_retry_delay(
        &self,
        current_attempt: u32,
        error_type: Option<&str>,
        elapsed: Duration,
    ) -> Option<Duration> {
        if !self.has_attempts_remaining(current_attempt) || !self.should_retry(error_type) {
            return None;
        }
        let delay = self.delay_for_attempt(current_attempt + 1);
        match self.expiration {
            Some(expiration) if elapsed.saturating_add(delay) >= expiration => None,
            _ => Some(delay),
        }
    }
}
