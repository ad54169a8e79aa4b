//! # Durable Execution Harness
//!
//! Hosts workflow and activity code against a remote orchestration engine.
//! The engine owns durable state, timers and task queues; this crate owns the
//! worker-side half of the contract.
//!
//! ## Features
//!
//! - **Registry**: name-keyed workflow and activity handlers with aliases, validated once at bind
//! - **Worker lifecycle**: adaptive polling, bounded concurrency and graceful stop
//! - **Context propagation**: baggage, deadlines and cooperative cancellation from workflow to activity
//! - **Activity contract**: timeout resolution, local start-to-close enforcement, throttled heartbeats
//! - **Invocation client**: start, cancel and describe workflow executions
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Bootstrap (one engine connection per process)     │
//! └─────────────────────────────────────────────────────────────┘
//!                │                                │
//!                ▼                                ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────┐
//! │            Worker             │  │      WorkflowClient      │
//! │ Registry → DispatchTable      │  │ (start/cancel/describe)  │
//! │ decision + activity poll loops│  │                          │
//! └───────────────────────────────┘  └──────────────────────────┘
//!                │                                │
//!                ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WorkflowService                           │
//! │   (engine RPC boundary; InMemoryWorkflowService in-process) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use mammoth_durable::prelude::*;
//!
//! struct GreetingWorkflow;
//!
//! impl Workflow for GreetingWorkflow {
//!     const TYPE: &'static str = "greeting";
//!     type Input = String;
//!     type Output = String;
//!
//!     fn new(_input: Self::Input) -> Self {
//!         Self
//!     }
//!
//!     fn on_start(&mut self, _ctx: &WorkflowContext) -> Vec<WorkflowAction> {
//!         vec![WorkflowAction::ScheduleActivity {
//!             activity_id: "greet".into(),
//!             activity_type: "greet".into(),
//!             input: json!("amar"),
//!             options: ActivityOptions::new().with_schedule_to_close(Duration::from_secs(60)),
//!         }]
//!     }
//!
//!     // ... implement other trait methods
//! }
//!
//! let bootstrap = Bootstrap::connect(ServiceConfig::default())?;
//! let mut registry = Registry::new();
//! registry.register_workflow::<GreetingWorkflow>();
//!
//! let worker = bootstrap.worker(registry, bootstrap.worker_config("halfblood"));
//! worker.start().await?;
//! ```

pub mod activity;
pub mod bootstrap;
pub mod client;
pub mod context;
pub mod engine;
pub mod error;
pub mod reliability;
pub mod service;
pub mod worker;
pub mod workflow;

pub(crate) mod serde_util;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{
        Activity, ActivityContext, ActivityError, ActivityFailure, ActivityOptions,
    };
    pub use crate::bootstrap::Bootstrap;
    pub use crate::client::{StartWorkflowOptions, WorkflowClient};
    pub use crate::context::{Baggage, ContextPropagator, ExecutionContext};
    pub use crate::engine::Registry;
    pub use crate::error::{ConfigurationError, ConnectionError, DispatchError};
    pub use crate::reliability::{RetryPolicy, TimeoutError, TimeoutType};
    pub use crate::service::{ExecutionHandle, ServiceConfig, WorkflowService, WorkflowStatus};
    pub use crate::worker::{Worker, WorkerConfig, WorkerError, WorkerState};
    pub use crate::workflow::{Workflow, WorkflowAction, WorkflowContext, WorkflowError};
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError, ActivityFailure, ActivityOptions};
pub use bootstrap::Bootstrap;
pub use client::{StartWorkflowOptions, WorkflowClient};
pub use context::{Baggage, ExecutionContext};
pub use engine::Registry;
pub use error::{ConfigurationError, ConnectionError, DispatchError};
pub use reliability::{RetryPolicy, TimeoutError, TimeoutType};
pub use service::{InMemoryWorkflowService, ServiceConfig, WorkflowService};
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerState};
pub use workflow::{Workflow, WorkflowAction, WorkflowContext, WorkflowError};
