//! The per-query object: fluent builder, execution, transactions and streaming.
//!
//! A [`Query`] is bound to one named connection of a [`crate::Registry`].
//! Builder calls record into its [`QueryState`]; terminal calls render the
//! state for the connection's dialect and run it.
//!
//! # Example
//!
//! ```ignore
//! use polyql::{ColumnValues, Comparator, Direction, Registry};
//!
//! let mut q = registry.start_query("main")?;
//! q.table("users")
//!     .where_("status", Comparator::Eq, "active")
//!     .order_by("created_at", Direction::Desc);
//! let page = q.paginate(20, 1).await?;
//! let rows = q.fetch().await?;
//!
//! q.begin_transaction().await?;
//! let mut insert = q.new_query();
//! insert.table("audit").insert([ColumnValues::new().set("event", "login")]);
//! insert.save().await?;
//! q.commit().await?;
//! ```

use crate::condition::{Comparator, ConditionSequence, Membership};
use crate::connection::{Connection, ConnectionPool, PooledConnection};
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::generate::Generator;
use crate::hooks::{AfterHook, HookAction, Hooks, QueryEvent, run_before, spawn_after};
use crate::param::Fragment;
use crate::record::{FromRecord, NativeResult, Record, ResultSet};
use crate::registry::Backend;
use crate::state::{
    COUNT_FIELD, ColumnValues, Direction, JoinCondition, Operation, Payload, QueryState, Target,
};
use crate::value::Value;
use crate::weighted::{Otherwise, WeightedCondition};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Consumer decision after receiving a streamed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Stop,
}

impl From<bool> for StreamControl {
    fn from(keep_going: bool) -> Self {
        if keep_going {
            StreamControl::Continue
        } else {
            StreamControl::Stop
        }
    }
}

/// Outcome of [`Query::paginate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub total_rows: u64,
    pub per_page: u64,
    pub page: u64,
}

impl Pagination {
    pub fn total_pages(&self) -> u64 {
        self.total_rows.div_ceil(self.per_page)
    }
}

/// A connection pinned by an open transaction, shared by every derived query.
///
/// Dropped while still open, the transaction is rolled back on a spawned task
/// and the connection released. Without a runtime the connection is discarded.
struct Transaction {
    conn: Mutex<Option<Box<dyn Connection>>>,
    pool: Arc<dyn ConnectionPool>,
    rollback: &'static str,
    streaming: AtomicBool,
}

impl Transaction {
    fn check_idle(&self) -> DbResult<()> {
        if self.streaming.load(Ordering::Acquire) {
            return Err(DbError::invalid(
                "transaction connection is busy streaming; run statements after the stream ends",
            ));
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        let rollback = self.rollback;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let result = conn.batch(rollback).await;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        target: "polyql",
                        rollback_ok = result.is_ok(),
                        "open transaction dropped, rolled back"
                    );
                    match result {
                        Ok(()) => pool.release(conn),
                        Err(_) => drop(conn),
                    }
                });
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "polyql",
                    "open transaction dropped outside a runtime, connection discarded"
                );
            }
        }
    }
}

/// Clears the streaming flag of a transaction when the stream ends.
struct StreamingGuard<'a>(&'a AtomicBool);

impl Drop for StreamingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One logical statement on a named connection.
#[derive(Clone)]
pub struct Query {
    backend: Arc<Backend>,
    state: QueryState,
    suppress_events: bool,
    transaction: Option<Arc<Transaction>>,
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("connection", &self.backend.name())
            .field("state", &self.state)
            .field("suppress_events", &self.suppress_events)
            .field("pinned", &self.transaction.is_some())
            .finish()
    }
}

impl Query {
    pub(crate) fn new(backend: Arc<Backend>) -> Self {
        Self {
            backend,
            state: QueryState::new(),
            suppress_events: false,
            transaction: None,
        }
    }

    /// A fresh query on the same connection, sharing hooks, event
    /// suppression and any open transaction.
    pub fn new_query(&self) -> Query {
        Query {
            backend: Arc::clone(&self.backend),
            state: QueryState::new(),
            suppress_events: self.suppress_events,
            transaction: self.transaction.clone(),
        }
    }

    pub fn connection_name(&self) -> &str {
        self.backend.name()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.backend.dialect().as_ref()
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    /// Disable (or re-enable) hooks for this query object.
    pub fn suppress_events(&mut self, suppress: bool) -> &mut Self {
        self.suppress_events = suppress;
        self
    }

    pub fn events_suppressed(&self) -> bool {
        self.suppress_events
    }

    /// This query as a derived table.
    pub fn subquery(&self, alias: impl Into<String>) -> Target {
        Target::subquery(&self.state, alias)
    }

    fn generator(&self) -> Generator<'_> {
        Generator::new(self.dialect())
    }

    // ==================== Builder ====================

    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.state.table(name);
        self
    }

    pub fn from_subquery(&mut self, query: &Query, alias: impl Into<String>) -> &mut Self {
        self.state.from_subquery(&query.state, alias);
        self
    }

    pub fn columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.columns(columns);
        self
    }

    pub fn add_column(&mut self, column: impl Into<String>) -> &mut Self {
        self.state.add_column(column);
        self
    }

    pub fn remove_column(&mut self, column: &str) -> &mut Self {
        self.state.remove_column(column);
        self
    }

    pub fn remove_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state.remove_columns(columns);
        self
    }

    pub fn keep_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.state.keep_columns(columns);
        self
    }

    pub fn join(&mut self, target: impl Into<Target>, condition: JoinCondition) -> &mut Self {
        self.state.join(target, condition);
        self
    }

    pub fn left_join(&mut self, target: impl Into<Target>, condition: JoinCondition) -> &mut Self {
        self.state.left_join(target, condition);
        self
    }

    pub fn where_(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.state.where_(field, comparator, value);
        self
    }

    pub fn where_literal(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.state.where_literal(field, comparator, value);
        self
    }

    pub fn where_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.state.where_null(field);
        self
    }

    pub fn where_not_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.state.where_not_null(field);
        self
    }

    pub fn where_in(&mut self, field: impl Into<String>, source: impl Into<Membership>) -> &mut Self {
        self.state.where_in(field, source);
        self
    }

    pub fn where_not_in(
        &mut self,
        field: impl Into<String>,
        source: impl Into<Membership>,
    ) -> &mut Self {
        self.state.where_not_in(field, source);
        self
    }

    pub fn weighted_where(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> &mut Self {
        self.state
            .weighted_where(field, comparator, value, weight, otherwise);
        self
    }

    pub fn weighted_where_literal(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> &mut Self {
        self.state
            .weighted_where_literal(field, comparator, value, weight, otherwise);
        self
    }

    /// A weighted condition to nest as another one's `otherwise`.
    pub fn sub_weighted_where(
        &self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> WeightedCondition {
        WeightedCondition::new(field, comparator, value, weight, otherwise)
    }

    pub fn add_weighted(&mut self, condition: WeightedCondition) -> &mut Self {
        self.state.add_weighted(condition);
        self
    }

    pub fn or(&mut self) -> &mut Self {
        self.state.or();
        self
    }

    pub fn and(&mut self) -> &mut Self {
        self.state.and();
        self
    }

    pub fn open_bracket(&mut self) -> &mut Self {
        self.state.open_bracket();
        self
    }

    pub fn close_bracket(&mut self) -> &mut Self {
        self.state.close_bracket();
        self
    }

    /// Append another query's WHERE nodes.
    pub fn copy_constraints(&mut self, other: &Query) -> &mut Self {
        self.state.copy_constraints(&other.state);
        self
    }

    pub fn group_by<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.group_by(fields);
        self
    }

    /// Edit the HAVING sequence.
    pub fn having(&mut self) -> &mut ConditionSequence {
        self.state.having()
    }

    pub fn order_by(&mut self, field: impl Into<String>, direction: Direction) -> &mut Self {
        self.state.order_by(field, direction);
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.state.limit(n);
        self
    }

    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.state.offset(n);
        self
    }

    pub fn insert<I, R>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnValues>,
    {
        self.state.insert(rows);
        self
    }

    pub fn insert_literal<I, R>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnValues>,
    {
        self.state.insert_literal(rows);
        self
    }

    pub fn update(&mut self, values: impl Into<ColumnValues>) -> &mut Self {
        self.state.update(values);
        self
    }

    pub fn update_literal(&mut self, values: impl Into<ColumnValues>) -> &mut Self {
        self.state.update_literal(values);
        self
    }

    pub fn set_incrementing_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.state.set_incrementing_field(field);
        self
    }

    // ==================== Rendering ====================

    pub fn to_select(&self) -> DbResult<Fragment> {
        self.generator().select(&self.state)
    }

    pub fn to_insert(&self) -> DbResult<Fragment> {
        self.generator().insert(&self.state)
    }

    pub fn to_update(&self) -> DbResult<Fragment> {
        self.generator().update(&self.state)
    }

    pub fn to_delete(&self) -> DbResult<Fragment> {
        self.generator().delete(&self.state)
    }

    pub fn to_count(&self) -> DbResult<Fragment> {
        self.generator().count(&self.state)
    }

    // ==================== Execution ====================

    /// Run the SELECT.
    pub async fn fetch(&mut self) -> DbResult<ResultSet> {
        let fragment = self.to_select()?;
        self.state.operation = Operation::Select;
        self.execute(Operation::Select, fragment).await
    }

    /// Run the SELECT and map every row.
    pub async fn fetch_as<T: FromRecord>(&mut self) -> DbResult<Vec<T>> {
        self.fetch().await?.decode()
    }

    /// Run the queued INSERT or UPDATE.
    pub async fn save(&mut self) -> DbResult<ResultSet> {
        let operation = match self.state.payload {
            Payload::Insert { .. } => Operation::Insert,
            Payload::Update { .. } => Operation::Update,
            Payload::None => {
                return Err(DbError::invalid("save requires insert rows or update values"));
            }
        };
        let fragment = self.generator().statement(&self.state, operation)?;
        self.state.operation = operation;
        self.execute(operation, fragment).await
    }

    pub async fn delete(&mut self) -> DbResult<ResultSet> {
        let fragment = self.to_delete()?;
        self.state.operation = Operation::Delete;
        self.execute(Operation::Delete, fragment).await
    }

    /// Number of rows the current SELECT would return.
    pub async fn count(&self) -> DbResult<u64> {
        let fragment = self.to_count()?;
        let result = self.execute(Operation::Select, fragment).await?;
        match result.first() {
            Some(row) => row.try_get::<u64>(COUNT_FIELD),
            None => Ok(0),
        }
    }

    /// Count all rows, then limit this query to `page` (1-based) of `per_page` rows.
    pub async fn paginate(&mut self, per_page: u64, page: u64) -> DbResult<Pagination> {
        if per_page == 0 {
            return Err(DbError::invalid("per_page must be at least 1"));
        }
        if page == 0 {
            return Err(DbError::invalid("page numbers start at 1"));
        }
        let offset = per_page
            .checked_mul(page - 1)
            .ok_or_else(|| DbError::invalid("page offset overflows"))?;

        let total_rows = self.count().await?;
        self.state.limit(per_page).offset(offset);
        Ok(Pagination {
            total_rows,
            per_page,
            page,
        })
    }

    /// Run caller-supplied SQL through the same hook and transaction path.
    pub async fn raw(&self, sql: &str, params: Vec<Value>) -> DbResult<ResultSet> {
        let operation = Operation::from_sql(sql).unwrap_or(self.state.operation);
        let fragment = Fragment {
            sql: sql.to_string(),
            params,
            param_names: Vec::new(),
        };
        self.execute(operation, fragment).await
    }

    fn event(&self, operation: Operation, fragment: &Fragment) -> QueryEvent {
        let mut connection = self.new_query();
        connection.suppress_events(true);
        QueryEvent::new(
            operation,
            self.state.target().map(|t| t.name().to_string()).unwrap_or_default(),
            fragment.sql.clone(),
            fragment.params.clone(),
            self.state.clone(),
            connection,
        )
    }

    /// Before-hooks, then the statement, then after-hooks.
    async fn execute(&self, operation: Operation, fragment: Fragment) -> DbResult<ResultSet> {
        let armed = self.arm_hooks(operation, &fragment);
        if let Some((hooks, event)) = &armed {
            if run_before(hooks.before(operation), event).await == HookAction::Halt {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "polyql",
                    operation = operation.as_str(),
                    table = event.table(),
                    "statement halted by before-hook"
                );
                return Ok(ResultSet::default());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "polyql.sql",
            connection = self.backend.name(),
            operation = operation.as_str(),
            param_count = fragment.params.len(),
            sql = %fragment.sql,
        );

        let native = self.run(&fragment.sql, &fragment.params).await?;
        let result = self
            .dialect()
            .map_result(native, self.state.incrementing_field());

        if let Some((hooks, event)) = armed {
            spawn_after(hooks.after(operation).to_vec(), event, result.clone());
        }
        Ok(result)
    }

    fn arm_hooks(&self, operation: Operation, fragment: &Fragment) -> Option<(Hooks, QueryEvent)> {
        if self.suppress_events {
            return None;
        }
        let hooks = self.backend.hooks();
        if hooks.before(operation).is_empty() && hooks.after(operation).is_empty() {
            return None;
        }
        Some((hooks, self.event(operation, fragment)))
    }

    /// Run on the pinned transaction connection if there is one, else on a pooled one.
    async fn run(&self, sql: &str, params: &[Value]) -> DbResult<NativeResult> {
        if let Some(tx) = &self.transaction {
            tx.check_idle()?;
            let mut pinned = tx.conn.lock().await;
            if let Some(conn) = pinned.as_mut() {
                return conn.run(sql, params).await;
            }
        }
        let mut conn = PooledConnection::acquire(self.backend.pool()?).await?;
        conn.get()?.run(sql, params).await
    }

    // ==================== Transactions ====================

    /// Whether this query family holds an open transaction.
    pub async fn in_transaction(&self) -> bool {
        match &self.transaction {
            Some(tx) => tx.conn.lock().await.is_some(),
            None => false,
        }
    }

    /// Pin a connection and issue the dialect's begin statement.
    ///
    /// Queries created from this one with [`Query::new_query`] afterwards
    /// share the connection until commit or rollback.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.in_transaction().await {
            return Err(DbError::invalid("a transaction is already in progress"));
        }
        let pool = self.backend.pool()?;
        let mut conn = PooledConnection::acquire(Arc::clone(&pool)).await?;
        conn.get()?.batch(self.dialect().begin_statement()).await?;
        let conn = conn
            .detach()
            .ok_or_else(|| DbError::Connection("connection already released".into()))?;

        self.transaction = Some(Arc::new(Transaction {
            conn: Mutex::new(Some(conn)),
            pool,
            rollback: self.dialect().rollback_statement(),
            streaming: AtomicBool::new(false),
        }));
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "polyql", connection = self.backend.name(), "transaction started");
        Ok(())
    }

    /// Commit; on failure roll back and return the commit error.
    pub async fn commit(&mut self) -> DbResult<()> {
        let mut conn = self.take_pinned().await?;
        let result = conn.get()?.batch(self.dialect().commit_statement()).await;
        match result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(target: "polyql", connection = self.backend.name(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                let rollback = conn.get()?.batch(self.dialect().rollback_statement()).await;
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    target: "polyql",
                    connection = self.backend.name(),
                    error = %err,
                    rollback_ok = rollback.is_ok(),
                    "commit failed, rollback issued"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = rollback;
                Err(err)
            }
        }
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let mut conn = self.take_pinned().await?;
        conn.get()?
            .batch(self.dialect().rollback_statement())
            .await?;
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "polyql", connection = self.backend.name(), "transaction rolled back");
        Ok(())
    }

    /// Unpin the transaction connection; it goes back to the pool when the guard drops.
    async fn take_pinned(&self) -> DbResult<PooledConnection> {
        let tx = self.transaction.as_ref().ok_or(DbError::NoTransaction)?;
        let conn = tx.conn.lock().await.take().ok_or(DbError::NoTransaction)?;
        Ok(PooledConnection::adopt(Arc::clone(&tx.pool), conn))
    }

    // ==================== Streaming ====================

    /// Deliver the SELECT's rows to `consumer` in chunks of `chunk_size`.
    ///
    /// The cursor is paused while the consumer runs. Returning
    /// [`StreamControl::Stop`] closes the cursor and ends the stream; a final
    /// partial chunk is delivered at end of results. The connection is
    /// released on every exit path.
    ///
    /// Inside a transaction the pinned connection carries the cursor, so
    /// statements of the same transaction issued from `consumer` fail with
    /// `InvalidArgument` instead of waiting for it.
    pub async fn stream<F, Fut>(&mut self, chunk_size: usize, mut consumer: F) -> DbResult<()>
    where
        F: FnMut(Vec<Record>) -> Fut,
        Fut: Future<Output = StreamControl>,
    {
        if chunk_size == 0 {
            return Err(DbError::invalid("chunk_size must be at least 1"));
        }
        let fragment = self.to_select()?;
        self.state.operation = Operation::Select;

        let armed = self.arm_hooks(Operation::Select, &fragment);
        if let Some((hooks, event)) = &armed {
            if run_before(hooks.before(Operation::Select), event).await == HookAction::Halt {
                return Ok(());
            }
        }
        let after = armed.map(|(hooks, event)| (hooks.after(Operation::Select).to_vec(), event));

        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "polyql.sql",
            connection = self.backend.name(),
            operation = "select",
            chunk_size,
            param_count = fragment.params.len(),
            sql = %fragment.sql,
        );

        if let Some(tx) = self.transaction.clone() {
            tx.check_idle()?;
            let mut pinned = tx.conn.lock().await;
            if let Some(conn) = pinned.as_mut() {
                tx.streaming.store(true, Ordering::Release);
                let _streaming = StreamingGuard(&tx.streaming);
                return deliver(conn.as_mut(), &fragment, chunk_size, &mut consumer, after.as_ref())
                    .await;
            }
        }
        let mut conn = PooledConnection::acquire(self.backend.pool()?).await?;
        deliver(conn.get()?, &fragment, chunk_size, &mut consumer, after.as_ref()).await
    }
}

async fn deliver<F, Fut>(
    conn: &mut dyn Connection,
    fragment: &Fragment,
    chunk_size: usize,
    consumer: &mut F,
    after: Option<&(Vec<Arc<dyn AfterHook>>, QueryEvent)>,
) -> DbResult<()>
where
    F: FnMut(Vec<Record>) -> Fut,
    Fut: Future<Output = StreamControl>,
{
    let mut cursor = conn.cursor(&fragment.sql, &fragment.params).await?;
    let mut chunk = Vec::with_capacity(chunk_size);

    loop {
        let row = match cursor.next_row().await {
            Ok(row) => row,
            Err(err) => {
                let _ = cursor.close().await;
                return Err(err);
            }
        };

        match row {
            Some(row) => {
                chunk.push(row);
                if chunk.len() < chunk_size {
                    continue;
                }
                cursor.pause();
                let rows = std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size));
                notify_chunk(after, &rows);
                if consumer(rows).await == StreamControl::Stop {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(target: "polyql", "stream stopped by consumer");
                    return cursor.close().await;
                }
                cursor.resume();
            }
            None => {
                if !chunk.is_empty() {
                    notify_chunk(after, &chunk);
                    consumer(chunk).await;
                }
                return Ok(());
            }
        }
    }
}

fn notify_chunk(after: Option<&(Vec<Arc<dyn AfterHook>>, QueryEvent)>, rows: &[Record]) {
    if let Some((hooks, event)) = after {
        if !hooks.is_empty() {
            spawn_after(
                hooks.clone(),
                event.clone(),
                ResultSet::from_rows(rows.to_vec()),
            );
        }
    }
}

impl From<&Query> for Membership {
    fn from(query: &Query) -> Self {
        Membership::subquery(&query.state)
    }
}
