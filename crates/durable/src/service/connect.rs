//! Engine connection setup

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{InMemoryWorkflowService, WorkflowService};
use crate::error::ConnectionError;

/// Scheme of the in-process engine
pub const MEMORY_SCHEME: &str = "memory";

/// Where the engine lives and which domain to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Namespace all executions and task lists belong to
    pub domain: String,
    /// Engine frontend service name
    pub service_name: String,
    /// Engine address, `scheme://host`
    pub endpoint: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            domain: "cadence-test".to_string(),
            service_name: "cadence-frontend".to_string(),
            endpoint: "memory://local".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn new(
        domain: impl Into<String>,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Open the engine connection described by this config
    ///
    /// Only the in-process engine is available; it comes up with the
    /// configured domain registered. Other schemes fail with
    /// [`ConnectionError::UnsupportedTransport`].
    pub fn connect(&self) -> Result<Arc<dyn WorkflowService>, ConnectionError> {
        let (scheme, host) = self.endpoint.split_once("://").ok_or_else(|| {
            ConnectionError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "expected scheme://host".to_string(),
            }
        })?;

        if host.is_empty() {
            return Err(ConnectionError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
                reason: "missing host".to_string(),
            });
        }

        match scheme {
            MEMORY_SCHEME => {
                info!(
                    endpoint = %self.endpoint,
                    service_name = %self.service_name,
                    domain = %self.domain,
                    "Using in-memory engine"
                );
                Ok(Arc::new(
                    InMemoryWorkflowService::new().with_domain(self.domain.clone()),
                ))
            }
            _ => Err(ConnectionError::UnsupportedTransport(self.endpoint.clone())),
        }
    }
}
