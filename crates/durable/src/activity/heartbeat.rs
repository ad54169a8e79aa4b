//! Throttled heartbeat forwarding
//!
//! Activity code may heartbeat as often as it likes. The forwarder sends the
//! first heartbeat immediately, then at most one per throttle interval,
//! always carrying the latest details. A heartbeat response asking for
//! cancellation, or telling us the task is gone, cancels the activity's
//! context and marks the cancellation as engine-requested. Worker shutdown
//! cancels the same context without setting that mark.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::HeartbeatPayload;
use crate::service::WorkflowService;

pub(crate) struct HeartbeatForwarder {
    service: Arc<dyn WorkflowService>,
    task_token: String,
    identity: String,
    throttle: Duration,
    cancel: CancellationToken,
    /// Set only when the engine asked for cancellation
    requested: CancellationToken,
}

impl HeartbeatForwarder {
    pub(crate) fn new(
        service: Arc<dyn WorkflowService>,
        task_token: String,
        identity: String,
        throttle: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            task_token,
            identity,
            throttle,
            cancel,
            requested: CancellationToken::new(),
        }
    }

    /// Token cancelled when the engine, not the worker, ends the activity
    pub(crate) fn cancel_requested(&self) -> CancellationToken {
        self.requested.clone()
    }

    /// Forward heartbeats until the activity drops its sender
    pub(crate) async fn run(self, mut rx: mpsc::Receiver<HeartbeatPayload>) {
        let mut pending: Option<Option<serde_json::Value>> = None;
        let mut next_send = Instant::now();

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(payload) => {
                        if Instant::now() >= next_send {
                            self.send(payload.details).await;
                            next_send = Instant::now() + self.throttle;
                        } else {
                            pending = Some(payload.details);
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(next_send), if pending.is_some() => {
                    if let Some(details) = pending.take() {
                        self.send(details).await;
                    }
                    next_send = Instant::now() + self.throttle;
                }
            }
        }
    }

    async fn send(&self, details: Option<serde_json::Value>) {
        match self
            .service
            .record_activity_task_heartbeat(&self.task_token, details, &self.identity)
            .await
        {
            Ok(response) if response.cancel_requested => {
                debug!(task_token = %self.task_token, "Cancellation requested via heartbeat");
                self.requested.cancel();
                self.cancel.cancel();
            }
            Ok(_) => {}
            Err(e) if e.is_gone() => {
                debug!(task_token = %self.task_token, error = %e, "Activity task no longer exists");
                self.requested.cancel();
                self.cancel.cancel();
            }
            Err(e) => {
                warn!(task_token = %self.task_token, error = %e, "Failed to record heartbeat");
            }
        }
    }
}
