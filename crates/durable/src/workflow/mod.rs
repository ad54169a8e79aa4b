//! Workflow abstractions and types
//!
//! This module contains the core workflow primitives:
//! - [`Workflow`] trait for defining workflow state machines
//! - [`WorkflowAction`] enum for workflow commands
//! - [`WorkflowEvent`] / [`HistoryEvent`] for the execution history
//! - [`WorkflowContext`] handed to every workflow callback

mod action;
mod context;
mod definition;
mod event;

pub use action::WorkflowAction;
pub use context::WorkflowContext;
pub use definition::{Workflow, WorkflowError};
pub use event::{HistoryEvent, WorkflowEvent};
