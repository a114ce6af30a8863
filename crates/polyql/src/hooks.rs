//! Before/after statement hooks.
//!
//! Hooks are registered per named connection and per [`Operation`]. Before
//! every statement the matching before-hooks receive a [`QueryEvent`]
//! snapshot and may halt it; after it completes the after-hooks receive the
//! same snapshot plus the result, on a spawned task when a tokio runtime is
//! running and inline otherwise.
//!
//! # Example
//!
//! ```ignore
//! use polyql::{HookAction, Operation, hooks};
//!
//! registry.add_before_hook("main", Operation::Delete, hooks::before_fn(|event| {
//!     if event.table() == "audit_log" { HookAction::Halt } else { HookAction::Continue }
//! }))?;
//! ```

use crate::query::Query;
use crate::record::ResultSet;
use crate::state::{Operation, QueryState};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "tracing")]
mod tracing_hook;

#[cfg(feature = "tracing")]
pub use tracing_hook::TracingHook;

/// Decision returned by a before-hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Let the statement run.
    Continue,
    /// Skip the statement; the caller receives an empty result.
    Halt,
}

/// Immutable snapshot of a pending statement.
#[derive(Clone)]
pub struct QueryEvent {
    operation: Operation,
    table: String,
    sql: String,
    params: Vec<Value>,
    state: QueryState,
    connection: Query,
}

impl QueryEvent {
    pub(crate) fn new(
        operation: Operation,
        table: String,
        sql: String,
        params: Vec<Value>,
        state: QueryState,
        connection: Query,
    ) -> Self {
        Self {
            operation,
            table,
            sql,
            params,
            state,
            connection,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Target table, or the alias of a derived table; empty for raw SQL.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Builder state the statement was rendered from.
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// A query on the same connection (and transaction) with hooks suppressed.
    pub fn connection(&self) -> Query {
        self.connection.clone()
    }
}

impl std::fmt::Debug for QueryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEvent")
            .field("operation", &self.operation)
            .field("table", &self.table)
            .field("sql", &self.sql)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Runs before a statement and may veto it.
#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, event: &QueryEvent) -> HookAction;
}

/// Runs after a statement; its outcome is ignored.
#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn after(&self, event: &QueryEvent, result: &ResultSet);
}

struct BeforeFn<F>(F);

#[async_trait]
impl<F> BeforeHook for BeforeFn<F>
where
    F: Fn(&QueryEvent) -> HookAction + Send + Sync,
{
    async fn before(&self, event: &QueryEvent) -> HookAction {
        (self.0)(event)
    }
}

struct AfterFn<F>(F);

#[async_trait]
impl<F> AfterHook for AfterFn<F>
where
    F: Fn(&QueryEvent, &ResultSet) + Send + Sync,
{
    async fn after(&self, event: &QueryEvent, result: &ResultSet) {
        (self.0)(event, result)
    }
}

/// Wrap a synchronous closure as a before-hook.
pub fn before_fn<F>(f: F) -> Arc<dyn BeforeHook>
where
    F: Fn(&QueryEvent) -> HookAction + Send + Sync + 'static,
{
    Arc::new(BeforeFn(f))
}

/// Wrap a synchronous closure as an after-hook.
pub fn after_fn<F>(f: F) -> Arc<dyn AfterHook>
where
    F: Fn(&QueryEvent, &ResultSet) + Send + Sync + 'static,
{
    Arc::new(AfterFn(f))
}

/// Ordered hook lists keyed by operation.
#[derive(Clone, Default)]
pub struct Hooks {
    before: HashMap<Operation, Vec<Arc<dyn BeforeHook>>>,
    after: HashMap<Operation, Vec<Arc<dyn AfterHook>>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_before(&mut self, operation: Operation, hook: Arc<dyn BeforeHook>) {
        self.before.entry(operation).or_default().push(hook);
    }

    pub fn add_after(&mut self, operation: Operation, hook: Arc<dyn AfterHook>) {
        self.after.entry(operation).or_default().push(hook);
    }

    pub fn before(&self, operation: Operation) -> &[Arc<dyn BeforeHook>] {
        self.before.get(&operation).map_or(&[], Vec::as_slice)
    }

    pub fn after(&self, operation: Operation) -> &[Arc<dyn AfterHook>] {
        self.after.get(&operation).map_or(&[], Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.before.values().all(Vec::is_empty) && self.after.values().all(Vec::is_empty)
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let before: usize = self.before.values().map(Vec::len).sum();
        let after: usize = self.after.values().map(Vec::len).sum();
        f.debug_struct("Hooks")
            .field("before", &before)
            .field("after", &after)
            .finish()
    }
}

/// Run every before-hook in order; halt if any of them asks to.
pub(crate) async fn run_before(hooks: &[Arc<dyn BeforeHook>], event: &QueryEvent) -> HookAction {
    let mut action = HookAction::Continue;
    for hook in hooks {
        if hook.before(event).await == HookAction::Halt {
            action = HookAction::Halt;
        }
    }
    action
}

/// Run after-hooks on a background task.
///
/// Outside a tokio runtime they run inline on a private current-thread runtime.
pub(crate) fn spawn_after(hooks: Vec<Arc<dyn AfterHook>>, event: QueryEvent, result: ResultSet) {
    if hooks.is_empty() {
        return;
    }
    let run = async move {
        for hook in &hooks {
            hook.after(&event, &result).await;
        }
    };
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(run);
        return;
    }
    match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime.block_on(run),
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(target: "polyql", error = %_err, "after-hooks skipped, no runtime available");
        }
    }
}
