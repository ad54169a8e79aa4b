//! Worker lifecycle and task execution
//!
//! This module provides:
//! - [`Worker`] - Binds a [`Registry`](crate::engine::Registry) to a task list and polls it
//! - [`WorkerConfig`] - Concurrency, grace period and poll settings
//! - [`PollerConfig`] - Task polling with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Worker                              │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐  │
//! │  │  Decision poll loop  │      │   Activity poll loop     │  │
//! │  │  (TaskPoller)        │      │   (TaskPoller)           │  │
//! │  └──────────┬───────────┘      └────────────┬─────────────┘  │
//! │             ▼                               ▼                │
//! │  ┌──────────────────────┐      ┌──────────────────────────┐  │
//! │  │ DecisionTaskRunner   │      │  ActivityTaskRunner      │  │
//! │  │ (replay + decide)    │      │  (invoke + heartbeat)    │  │
//! │  │ Semaphore-limited    │      │  Semaphore-limited       │  │
//! │  └──────────────────────┘      └──────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use mammoth_durable::worker::{Worker, WorkerConfig};
//!
//! let mut registry = Registry::new();
//! registry
//!     .register_workflow::<HelloWorldWorkflow>()
//!     .register_activity(ProcessEchoActivity);
//!
//! let worker = Worker::new(service, WorkerConfig::new("cadence-test", "halfblood"), registry);
//! worker.start().await?;
//!
//! // Graceful shutdown
//! worker.stop().await;
//! ```

mod activity_task;
mod config;
mod decision_task;
mod lifecycle;
mod poller;

use std::any::Any;

use tracing::{debug, warn};

use crate::service::ServiceError;

pub use config::{FeatureFlags, WorkerConfig};
pub use lifecycle::{Worker, WorkerError, WorkerState};
pub use poller::{PollerConfig, PollerError};

/// Best-effort text of a captured panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Log the engine's answer to a task response
///
/// A task whose execution closed in the meantime is expected churn, so it is
/// only logged at debug when the already-completed error is enabled.
pub(crate) fn report_outcome(
    result: Result<(), ServiceError>,
    flags: FeatureFlags,
    kind: &str,
    task_token: &str,
) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_gone() && flags.workflow_execution_already_completed_error => {
            debug!(kind, task_token, error = %e, "Task response dropped, execution is gone");
        }
        Err(e) => {
            warn!(kind, task_token, error = %e, "Failed to report task outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panic: boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("bad state"));
        assert_eq!(panic_message(payload.as_ref()), "panic: bad state");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }
}
