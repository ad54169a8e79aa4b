//! Handler registry and decision engine
//!
//! [`Registry`] collects workflow and activity handlers and binds them into a
//! [`DispatchTable`]. The decision driver replays history through a workflow
//! and turns the actions it returns into [`Decision`](crate::service::Decision)s.

mod driver;
mod registry;

pub use driver::DecisionError;
pub use registry::{
    ActivityHandler, DispatchTable, HandlerEntry, HandlerKind, Registry, WorkflowHandler,
};
