//! In-memory connector that records everything the engine asks of it.

#![allow(dead_code)]

use async_trait::async_trait;
use polyql::{
    Connection, ConnectionConfig, ConnectionPool, Connector, DbError, DbResult, DialectKind,
    NativeResult, Record, Registry, RowCursor, Value,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub conn: usize,
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
pub struct MockState {
    statements: Mutex<Vec<Statement>>,
    responses: Mutex<VecDeque<NativeResult>>,
    failing_batches: Mutex<Vec<String>>,
    stream_rows: Mutex<Vec<Record>>,
    stream_error_at: Mutex<Option<usize>>,
    next_conn: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub paused: AtomicUsize,
    pub resumed: AtomicUsize,
    pub cursors_closed: AtomicUsize,
    pub pools_opened: AtomicUsize,
    pub pools_closed: AtomicUsize,
}

impl MockState {
    pub fn statements(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }

    pub fn sqls(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Queue the next result returned by `run`.
    pub fn respond(&self, result: NativeResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn fail_batch(&self, sql: &str) {
        self.failing_batches.lock().unwrap().push(sql.to_string());
    }

    pub fn set_stream_rows(&self, rows: Vec<Record>) {
        *self.stream_rows.lock().unwrap() = rows;
    }

    pub fn fail_stream_at(&self, index: usize) {
        *self.stream_error_at.lock().unwrap() = Some(index);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn log(&self, conn: usize, sql: &str, params: &[Value]) {
        self.statements.lock().unwrap().push(Statement {
            conn,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

pub struct MockConnector {
    pub state: Arc<MockState>,
}

impl Connector for MockConnector {
    fn open_pool(&self, _name: &str, _config: &ConnectionConfig) -> DbResult<Arc<dyn ConnectionPool>> {
        self.state.pools_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockPool {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockPool {
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::Connection("pool closed".into()));
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        let id = self.state.next_conn.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
        }))
    }

    fn release(&self, connection: Box<dyn Connection>) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
        drop(connection);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.state.pools_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockConnection {
    id: usize,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn run(&mut self, sql: &str, params: &[Value]) -> DbResult<NativeResult> {
        self.state.log(self.id, sql, params);
        let next = self.state.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or(NativeResult::Rows(Vec::new())))
    }

    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        self.state.log(self.id, sql, &[]);
        if self.state.failing_batches.lock().unwrap().iter().any(|s| s == sql) {
            return Err(DbError::execution(io::Error::other(format!("{sql} failed"))));
        }
        Ok(())
    }

    async fn cursor<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> DbResult<Box<dyn RowCursor + 'a>> {
        self.state.log(self.id, sql, params);
        let rows = self.state.stream_rows.lock().unwrap().clone();
        let fail_at = *self.state.stream_error_at.lock().unwrap();
        Ok(Box::new(MockCursor {
            rows: rows.into(),
            position: 0,
            fail_at,
            paused: false,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockCursor {
    rows: VecDeque<Record>,
    position: usize,
    fail_at: Option<usize>,
    paused: bool,
    state: Arc<MockState>,
}

#[async_trait]
impl RowCursor for MockCursor {
    async fn next_row(&mut self) -> DbResult<Option<Record>> {
        assert!(!self.paused, "row requested while paused");
        if self.fail_at == Some(self.position) {
            return Err(DbError::stream(io::Error::other("connection reset")));
        }
        self.position += 1;
        Ok(self.rows.pop_front())
    }

    fn pause(&mut self) {
        self.paused = true;
        self.state.paused.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.paused = false;
        self.state.resumed.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&mut self) -> DbResult<()> {
        self.state.cursors_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A registry with one connection named `main` backed by the mock.
pub async fn registry(kind: DialectKind) -> (Registry, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let registry = Registry::new().with_connector(
        kind,
        Arc::new(MockConnector {
            state: Arc::clone(&state),
        }),
    );
    registry
        .add_config("main", ConnectionConfig::new(kind).with_database("test"))
        .await
        .unwrap();
    (registry, state)
}

pub fn rows(n: i64) -> Vec<Record> {
    (1..=n).map(|id| Record::new().with("id", id)).collect()
}
