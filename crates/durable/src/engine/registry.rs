//! Handler registry and dispatch table
//!
//! Handlers are registered before the worker starts, each under an explicit
//! name: the alias given at registration, or the handler's `TYPE` constant
//! when the alias is empty. [`Registry::bind`] validates every effective name
//! and freezes the entries into a read-only [`DispatchTable`].

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::driver::{self, DecisionError};
use crate::activity::{error_types, Activity, ActivityContext, ActivityError, ActivityFailure};
use crate::context::ExecutionContext;
use crate::error::{ConfigurationError, DispatchError};
use crate::service::{Decision, DecisionTask};
use crate::workflow::{Workflow, WorkflowAction, WorkflowContext};

/// Which table a handler lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Workflow,
    Activity,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow => f.write_str("workflow"),
            Self::Activity => f.write_str("activity"),
        }
    }
}

/// Type-erased workflow instance
///
/// Lets the decision driver call a workflow without knowing its concrete
/// type. Payloads are JSON.
pub(crate) trait AnyWorkflow: Send {
    fn on_start(&mut self, ctx: &WorkflowContext) -> Vec<WorkflowAction>;

    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        result: Value,
    ) -> Vec<WorkflowAction>;

    fn on_activity_failed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        failure: &ActivityFailure,
    ) -> Vec<WorkflowAction>;

    fn on_timer_fired(&mut self, ctx: &WorkflowContext, timer_id: &str) -> Vec<WorkflowAction>;

    fn on_cancel_requested(&mut self, ctx: &WorkflowContext, reason: &str)
        -> Vec<WorkflowAction>;
}

/// Wrapper to implement AnyWorkflow for any Workflow
struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    fn on_start(&mut self, ctx: &WorkflowContext) -> Vec<WorkflowAction> {
        self.inner.on_start(ctx)
    }

    fn on_activity_completed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        result: Value,
    ) -> Vec<WorkflowAction> {
        self.inner.on_activity_completed(ctx, activity_id, result)
    }

    fn on_activity_failed(
        &mut self,
        ctx: &WorkflowContext,
        activity_id: &str,
        failure: &ActivityFailure,
    ) -> Vec<WorkflowAction> {
        self.inner.on_activity_failed(ctx, activity_id, failure)
    }

    fn on_timer_fired(&mut self, ctx: &WorkflowContext, timer_id: &str) -> Vec<WorkflowAction> {
        self.inner.on_timer_fired(ctx, timer_id)
    }

    fn on_cancel_requested(
        &mut self,
        ctx: &WorkflowContext,
        reason: &str,
    ) -> Vec<WorkflowAction> {
        self.inner.on_cancel_requested(ctx, reason)
    }
}

/// Produces the decisions for one decision task
pub trait WorkflowHandler: Send + Sync {
    fn decide(
        &self,
        task: &DecisionTask,
        execution: ExecutionContext,
    ) -> Result<Vec<Decision>, DecisionError>;
}

/// Runs one activity attempt
pub trait ActivityHandler: Send + Sync {
    fn invoke<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, ActivityError>>;
}

struct TypedWorkflowHandler<W: Workflow> {
    _marker: PhantomData<fn() -> W>,
}

impl<W: Workflow> WorkflowHandler for TypedWorkflowHandler<W> {
    fn decide(
        &self,
        task: &DecisionTask,
        execution: ExecutionContext,
    ) -> Result<Vec<Decision>, DecisionError> {
        let factory = |input: Value| -> Result<Box<dyn AnyWorkflow>, serde_json::Error> {
            let typed_input: W::Input = serde_json::from_value(input)?;
            Ok(Box::new(WorkflowWrapper {
                inner: W::new(typed_input),
            }))
        };
        driver::drive(factory, &W::default_activity_options(), task, execution)
    }
}

struct TypedActivityHandler<A: Activity> {
    activity: A,
}

impl<A: Activity> ActivityHandler for TypedActivityHandler<A> {
    fn invoke<'a>(
        &'a self,
        ctx: &'a ActivityContext,
        input: Value,
    ) -> BoxFuture<'a, Result<Value, ActivityError>> {
        Box::pin(async move {
            let typed_input: A::Input = serde_json::from_value(input).map_err(|e| {
                ActivityError::non_retryable(format!("failed to decode input: {e}"))
                    .with_type(error_types::INVALID_INPUT)
            })?;
            let output = self.activity.execute(ctx, typed_input).await?;
            serde_json::to_value(output).map_err(|e| {
                ActivityError::non_retryable(format!("failed to encode output: {e}"))
                    .with_type(error_types::INVALID_OUTPUT)
            })
        })
    }
}

#[derive(Clone)]
enum Handler {
    Workflow(Arc<dyn WorkflowHandler>),
    Activity(Arc<dyn ActivityHandler>),
}

/// One registered handler
#[derive(Clone)]
pub struct HandlerEntry {
    alias: String,
    default_name: &'static str,
    handler: Handler,
}

impl HandlerEntry {
    pub fn kind(&self) -> HandlerKind {
        match self.handler {
            Handler::Workflow(_) => HandlerKind::Workflow,
            Handler::Activity(_) => HandlerKind::Activity,
        }
    }

    /// Alias if one was given, otherwise the handler's declared name
    pub fn effective_name(&self) -> &str {
        if self.alias.is_empty() {
            self.default_name
        } else {
            &self.alias
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("kind", &self.kind())
            .field("name", &self.effective_name())
            .finish()
    }
}

/// Registry of workflow and activity handlers
///
/// # Example
///
/// ```ignore
/// let mut registry = Registry::new();
/// registry.register_workflow_with_alias::<SimpleWorkflow>("hello_world")?;
/// registry.register_activity(ProcessEchoActivity);
/// ```
#[derive(Default)]
pub struct Registry {
    entries: Vec<HandlerEntry>,
    bound: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow under its `TYPE` name
    pub fn register_workflow<W: Workflow>(&mut self) -> &mut Self {
        self.push(workflow_entry::<W>(String::new()));
        self
    }

    /// Register a workflow under `alias`
    ///
    /// A non-empty alias that is already taken fails immediately; an empty
    /// alias falls back to `TYPE` and is checked at bind time.
    pub fn register_workflow_with_alias<W: Workflow>(
        &mut self,
        alias: impl Into<String>,
    ) -> Result<&mut Self, ConfigurationError> {
        let entry = workflow_entry::<W>(alias.into());
        self.check_alias(&entry)?;
        self.push(entry);
        Ok(self)
    }

    /// Register an activity under its `TYPE` name
    pub fn register_activity<A: Activity>(&mut self, activity: A) -> &mut Self {
        self.push(activity_entry(activity, String::new()));
        self
    }

    /// Register an activity under `alias`
    pub fn register_activity_with_alias<A: Activity>(
        &mut self,
        activity: A,
        alias: impl Into<String>,
    ) -> Result<&mut Self, ConfigurationError> {
        let entry = activity_entry(activity, alias.into());
        self.check_alias(&entry)?;
        self.push(entry);
        Ok(self)
    }

    pub fn entries(&self) -> &[HandlerEntry] {
        &self.entries
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Validate every effective name and freeze the dispatch table
    ///
    /// Succeeds at most once per registry; any later call is
    /// [`ConfigurationError::AlreadyBound`].
    pub fn bind(&mut self) -> Result<DispatchTable, ConfigurationError> {
        if self.bound {
            return Err(ConfigurationError::AlreadyBound);
        }
        self.bound = true;

        let mut table = DispatchTable::default();
        for entry in &self.entries {
            let name = entry.effective_name();
            if name.trim().is_empty() {
                return Err(ConfigurationError::EmptyName { kind: entry.kind() });
            }
            let duplicate = match &entry.handler {
                Handler::Workflow(handler) => table
                    .workflows
                    .insert(name.to_string(), Arc::clone(handler))
                    .is_some(),
                Handler::Activity(handler) => table
                    .activities
                    .insert(name.to_string(), Arc::clone(handler))
                    .is_some(),
            };
            if duplicate {
                return Err(ConfigurationError::DuplicateName {
                    kind: entry.kind(),
                    name: name.to_string(),
                });
            }
        }

        debug!(
            workflows = table.workflows.len(),
            activities = table.activities.len(),
            "Registry bound"
        );
        Ok(table)
    }

    fn check_alias(&self, entry: &HandlerEntry) -> Result<(), ConfigurationError> {
        if entry.alias.is_empty() {
            return Ok(());
        }
        let taken = self
            .entries
            .iter()
            .any(|e| e.kind() == entry.kind() && e.effective_name() == entry.alias);
        if taken {
            return Err(ConfigurationError::DuplicateName {
                kind: entry.kind(),
                name: entry.alias.clone(),
            });
        }
        Ok(())
    }

    fn push(&mut self, entry: HandlerEntry) {
        debug!(kind = %entry.kind(), name = entry.effective_name(), "Registered handler");
        self.entries.push(entry);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries)
            .field("bound", &self.bound)
            .finish()
    }
}

fn workflow_entry<W: Workflow>(alias: String) -> HandlerEntry {
    HandlerEntry {
        alias,
        default_name: W::TYPE,
        handler: Handler::Workflow(Arc::new(TypedWorkflowHandler::<W> {
            _marker: PhantomData,
        })),
    }
}

fn activity_entry<A: Activity>(activity: A, alias: String) -> HandlerEntry {
    HandlerEntry {
        alias,
        default_name: A::TYPE,
        handler: Handler::Activity(Arc::new(TypedActivityHandler { activity })),
    }
}

/// Name-keyed handler lookup, read-only once built
#[derive(Clone, Default)]
pub struct DispatchTable {
    workflows: HashMap<String, Arc<dyn WorkflowHandler>>,
    activities: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl DispatchTable {
    pub fn workflow(&self, name: &str) -> Result<Arc<dyn WorkflowHandler>, DispatchError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownHandler {
                kind: HandlerKind::Workflow,
                name: name.to_string(),
            })
    }

    pub fn activity(&self, name: &str) -> Result<Arc<dyn ActivityHandler>, DispatchError> {
        self.activities
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownHandler {
                kind: HandlerKind::Activity,
                name: name.to_string(),
            })
    }

    pub fn workflow_names(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }

    pub fn activity_names(&self) -> impl Iterator<Item = &str> {
        self.activities.keys().map(|s| s.as_str())
    }

    pub fn has_workflows(&self) -> bool {
        !self.workflows.is_empty()
    }

    pub fn has_activities(&self) -> bool {
        !self.activities.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("workflows", &self.workflows.keys().collect::<Vec<_>>())
            .field("activities", &self.activities.keys().collect::<Vec<_>>())
            .finish()
    }
}
