//! Process-wide composition
//!
//! [`Bootstrap`] is built once at process start. It owns the engine
//! connection and hands it to every worker and client it creates, so they all
//! talk to the same engine in the same domain.

use std::sync::Arc;

use tracing::instrument;

use crate::client::WorkflowClient;
use crate::engine::Registry;
use crate::error::ConnectionError;
use crate::service::{ServiceConfig, WorkflowService};
use crate::worker::{FeatureFlags, Worker, WorkerConfig};

pub struct Bootstrap {
    config: ServiceConfig,
    service: Arc<dyn WorkflowService>,
    feature_flags: FeatureFlags,
}

impl Bootstrap {
    /// Open the engine connection described by `config`
    #[instrument(skip(config), fields(endpoint = %config.endpoint, domain = %config.domain))]
    pub fn connect(config: ServiceConfig) -> Result<Self, ConnectionError> {
        let service = config.connect()?;
        Ok(Self::with_service(config, service))
    }

    /// Compose over an existing engine connection
    pub fn with_service(config: ServiceConfig, service: Arc<dyn WorkflowService>) -> Self {
        Self {
            config,
            service,
            feature_flags: FeatureFlags::default(),
        }
    }

    pub fn with_feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.feature_flags = flags;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<dyn WorkflowService> {
        Arc::clone(&self.service)
    }

    /// Worker settings for `task_list` in this domain
    pub fn worker_config(&self, task_list: impl Into<String>) -> WorkerConfig {
        WorkerConfig::new(self.config.domain.clone(), task_list)
            .with_feature_flags(self.feature_flags)
    }

    /// Worker sharing this connection
    pub fn worker(&self, registry: Registry, config: WorkerConfig) -> Worker {
        Worker::new(self.service(), config, registry)
    }

    /// Invocation client sharing this connection
    pub fn client(&self) -> WorkflowClient {
        WorkflowClient::new(self.service(), self.config.domain.clone())
            .with_feature_flags(self.feature_flags)
    }
}
