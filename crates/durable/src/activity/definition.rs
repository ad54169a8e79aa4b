//! Activity trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;
use crate::reliability::{TimeoutError, TimeoutType};

/// Error types the harness itself attaches to activity failures
pub mod error_types {
    /// No activity registered under the requested name
    pub const UNKNOWN_ACTIVITY_TYPE: &str = "UNKNOWN_ACTIVITY_TYPE";
    /// Input could not be decoded into the activity's input type
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    /// Output could not be encoded
    pub const INVALID_OUTPUT: &str = "INVALID_OUTPUT";
    /// Activity code panicked
    pub const PANIC: &str = "PANIC";
}

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors fail the activity without further attempts.
    pub retryable: bool,

    /// Additional error details
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{error_type}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Final outcome of an activity as seen by the scheduling workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ActivityFailure {
    /// Handler returned an error (after retries were exhausted)
    #[error("activity failed: {0}")]
    Failed(ActivityError),

    /// An activity timeout fired
    #[error("{0}")]
    TimedOut(TimeoutError),

    /// Activity acknowledged a cancellation request
    #[error("activity cancelled")]
    Cancelled { details: Option<serde_json::Value> },
}

impl ActivityFailure {
    pub fn timeout_type(&self) -> Option<TimeoutType> {
        match self {
            Self::TimedOut(timeout) => Some(timeout.timeout_type),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout_type().is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Error type used for retry classification
    pub fn error_type(&self) -> Option<&str> {
        match self {
            Self::Failed(error) => error.error_type.as_deref(),
            Self::TimedOut(_) | Self::Cancelled { .. } => None,
        }
    }
}

/// An activity is a unit of work that may fail and be retried
///
/// Activities run on a worker outside the workflow. They may take a long
/// time, can fail and be retried by the engine, and report liveness through
/// heartbeats. Handlers must be idempotent: an attempt may run again after a
/// timeout even if the earlier attempt eventually finished.
///
/// # Example
///
/// ```ignore
/// use mammoth_durable::prelude::*;
///
/// struct SendEmailActivity;
///
/// #[async_trait]
/// impl Activity for SendEmailActivity {
///     const TYPE: &'static str = "send_email";
///     type Input = SendEmailInput;
///     type Output = SendEmailOutput;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, ActivityError> {
///         ctx.heartbeat(None).await?;
///         Ok(SendEmailOutput { message_id: "..." })
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Default name the activity is registered under
    const TYPE: &'static str;

    /// Input type for the activity
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type for the activity
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute the activity
    ///
    /// Return `ActivityError::retryable()` for transient failures that should be retried.
    /// Return `ActivityError::non_retryable()` for permanent failures.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}
