//! Setup and dispatch error taxonomy
//!
//! - [`ConfigurationError`] and [`ConnectionError`] are setup-phase failures.
//!   They are fatal to the hosting process and are never raised once polling
//!   has started.
//! - [`DispatchError`] is returned to callers of the invocation client (or
//!   reported to the engine for unknown task names) and never crashes a worker.
//!
//! Handler failures live next to the handler traits
//! ([`ActivityError`](crate::activity::ActivityError),
//! [`WorkflowError`](crate::workflow::WorkflowError)) and timeout failures in
//! [`TimeoutError`](crate::reliability::TimeoutError).

use std::time::Duration;

use crate::context::ContextDone;
use crate::engine::HandlerKind;
use crate::service::ServiceError;

/// Invalid registration or policy configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Two handlers of the same kind resolve to the same name
    #[error("{kind} name already registered: {name}")]
    DuplicateName { kind: HandlerKind, name: String },

    /// A handler resolved to an empty name
    #[error("{kind} handler has an empty name")]
    EmptyName { kind: HandlerKind },

    /// Registry was bound a second time
    #[error("registry is already bound to a worker")]
    AlreadyBound,

    /// Timeouts violate the required ordering
    #[error("invalid timeout ordering: {0}")]
    InvalidTimeoutOrdering(String),

    /// Not enough timeouts were provided to resolve the policy
    #[error("activity policy needs schedule_to_close, or schedule_to_start together with start_to_close")]
    MissingTimeout,

    /// A duration field was zero
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    /// A duration field exceeded the longest accepted timeout
    #[error("{field} ({value:?}) must not exceed {limit:?}")]
    DurationTooLong {
        field: &'static str,
        value: Duration,
        limit: Duration,
    },

    /// Any other invalid value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigurationError {
    pub(crate) fn ordering(
        larger: &'static str,
        larger_value: Duration,
        smaller: &'static str,
        smaller_value: Duration,
    ) -> Self {
        Self::InvalidTimeoutOrdering(format!(
            "{larger} ({larger_value:?}) must not be less than {smaller} ({smaller_value:?})"
        ))
    }

    /// Reject durations longer than [`MAX_TIMEOUT`](crate::reliability::MAX_TIMEOUT)
    pub(crate) fn check_bounded(field: &'static str, value: Duration) -> Result<(), Self> {
        let limit = crate::reliability::MAX_TIMEOUT;
        if value > limit {
            return Err(Self::DurationTooLong {
                field,
                value,
                limit,
            });
        }
        Ok(())
    }
}

/// Engine could not be reached or rejected the handshake
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Endpoint scheme has no transport in this build
    #[error("unsupported transport for endpoint {0}")]
    UnsupportedTransport(String),

    /// Endpoint string could not be parsed
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Domain is unknown to the engine
    #[error("domain not found: {0}")]
    DomainNotFound(String),

    /// Handshake call failed
    #[error("handshake with engine failed: {0}")]
    Handshake(#[source] ServiceError),
}

/// Failure dispatching a start/cancel/describe request, or resolving a task's
/// handler
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Start options failed local validation
    #[error("invalid workflow options: {0}")]
    InvalidOptions(String),

    /// An open run already uses this workflow ID
    #[error("workflow {workflow_id} is already running (run {run_id})")]
    AlreadyStarted { workflow_id: String, run_id: String },

    /// Target execution is closed
    #[error("workflow {workflow_id} already completed (run {run_id})")]
    AlreadyCompleted { workflow_id: String, run_id: String },

    /// Target execution does not exist
    #[error("workflow execution not found: {0}")]
    NotFound(String),

    /// No handler bound under this name
    #[error("no {kind} registered under name {name}")]
    UnknownHandler { kind: HandlerKind, name: String },

    /// Input could not be encoded
    #[error("failed to encode workflow input: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Caller context was cancelled before the engine answered
    #[error("request cancelled by caller context")]
    Cancelled,

    /// Caller context deadline elapsed before the engine answered
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Engine rejected the request for another reason
    #[error("engine rejected request: {0}")]
    Rejected(#[source] ServiceError),
}

impl From<ContextDone> for DispatchError {
    fn from(done: ContextDone) -> Self {
        match done {
            ContextDone::Cancelled => Self::Cancelled,
            ContextDone::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_display() {
        let error = ConfigurationError::DuplicateName {
            kind: HandlerKind::Activity,
            name: "process_echo".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "activity name already registered: process_echo"
        );
    }

    #[test]
    fn test_ordering_message() {
        let error = ConfigurationError::ordering(
            "schedule_to_close",
            Duration::from_secs(10),
            "start_to_close",
            Duration::from_secs(60),
        );
        let message = error.to_string();
        assert!(message.contains("schedule_to_close (10s)"));
        assert!(message.contains("start_to_close (60s)"));
    }

    #[test]
    fn test_unknown_handler_display() {
        let error = DispatchError::UnknownHandler {
            kind: HandlerKind::Workflow,
            name: "missing".to_string(),
        };
        assert_eq!(error.to_string(), "no workflow registered under name missing");
    }
}
