//! Connection-layer contract.
//!
//! The query engine talks to a backend only through these traits:
//!
//! - [`Connector`] opens a [`ConnectionPool`] for a named configuration.
//! - [`ConnectionPool`] hands out and takes back [`Connection`]s.
//! - [`Connection`] runs statements and opens [`RowCursor`]s.
//!
//! The Postgres backend (feature `pool`) implements them over
//! deadpool-postgres. Other drivers plug in by implementing the same traits.

use crate::config::ConnectionConfig;
use crate::error::{DbError, DbResult};
use crate::record::{NativeResult, Record};
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// Opens pools for one dialect.
pub trait Connector: Send + Sync {
    /// Build a pool. Called lazily, the first time a named connection is used.
    fn open_pool(&self, name: &str, config: &ConnectionConfig) -> DbResult<Arc<dyn ConnectionPool>>;
}

#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn acquire(&self) -> DbResult<Box<dyn Connection>>;

    /// Return a connection. The default drops it.
    fn release(&self, connection: Box<dyn Connection>) {
        drop(connection);
    }

    /// Close the pool; later acquires fail.
    async fn close(&self);
}

#[async_trait]
pub trait Connection: Send {
    /// Run one parameterized statement.
    async fn run(&mut self, sql: &str, params: &[Value]) -> DbResult<NativeResult>;

    /// Run a parameterless control statement (`BEGIN`, `COMMIT`, ...).
    async fn batch(&mut self, sql: &str) -> DbResult<()>;

    /// Open a row cursor over a SELECT.
    async fn cursor<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> DbResult<Box<dyn RowCursor + 'a>>;
}

/// Pull-based row source used by streaming.
///
/// Rows are only fetched while the consumer asks for them; [`RowCursor::pause`]
/// and [`RowCursor::resume`] bracket each chunk handed to the consumer for
/// push-based drivers that need explicit flow control.
#[async_trait]
pub trait RowCursor: Send {
    /// Next row, or `None` at end of results.
    async fn next_row(&mut self) -> DbResult<Option<Record>>;

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    /// Tear the cursor down before it is exhausted.
    async fn close(&mut self) -> DbResult<()>;
}

/// A pooled connection that goes back to its pool when dropped.
pub(crate) struct PooledConnection {
    pool: Arc<dyn ConnectionPool>,
    conn: Option<Box<dyn Connection>>,
}

impl PooledConnection {
    pub(crate) async fn acquire(pool: Arc<dyn ConnectionPool>) -> DbResult<Self> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
        })
    }

    /// Guard a connection that was detached earlier.
    pub(crate) fn adopt(pool: Arc<dyn ConnectionPool>, conn: Box<dyn Connection>) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    pub(crate) fn get(&mut self) -> DbResult<&mut (dyn Connection + 'static)> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::Connection("connection already released".into()))
    }

    /// Detach the connection from this guard without releasing it.
    pub(crate) fn detach(mut self) -> Option<Box<dyn Connection>> {
        self.conn.take()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
