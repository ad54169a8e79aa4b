//! Orchestration engine boundary
//!
//! - [`WorkflowService`] is the RPC surface the worker and client use
//! - [`InMemoryWorkflowService`] is an in-process engine for tests and local runs
//! - [`ServiceConfig`] turns domain/endpoint settings into a connection

mod api;
mod connect;
mod memory;
#[cfg(test)]
pub(crate) mod mock;

pub use api::*;
pub use connect::{ServiceConfig, MEMORY_SCHEME};
pub use memory::InMemoryWorkflowService;
