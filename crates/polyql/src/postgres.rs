//! Postgres backend over deadpool-postgres.
//!
//! Registered by default for [`DialectKind::Postgres`](crate::DialectKind)
//! configurations when the `pool` feature is enabled.

use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionPool, Connector, RowCursor};
use crate::error::{DbError, DbResult};
use crate::record::{NativeResult, Record};
use crate::state::Operation;
use crate::value::Value;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures_core::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row, RowStream};

/// Opens deadpool pools from a [`ConnectionConfig`].
#[derive(Debug, Clone, Default)]
pub struct PostgresConnector {
    _priv: (),
}

impl PostgresConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for PostgresConnector {
    fn open_pool(&self, name: &str, config: &ConnectionConfig) -> DbResult<Arc<dyn ConnectionPool>> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port())
            .dbname(&config.database)
            .user(&config.user)
            .application_name(name);
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        let manager = Manager::from_config(
            pg,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .build()
            .map_err(|e| DbError::Pool(e.to_string()))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            target: "polyql",
            connection = name,
            host = %config.host,
            database = %config.database,
            max_size = config.max_connections,
            "postgres pool created"
        );
        Ok(Arc::new(PgPool { pool }))
    }
}

struct PgPool {
    pool: Pool,
}

#[async_trait]
impl ConnectionPool for PgPool {
    async fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        let client = self.pool.get().await?;
        Ok(Box::new(PgConnection { client }))
    }

    async fn close(&self) {
        self.pool.close();
    }
}

struct PgConnection {
    client: Object,
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PgConnection {
    async fn run(&mut self, sql: &str, params: &[Value]) -> DbResult<NativeResult> {
        let statement = self.client.prepare_cached(sql).await?;
        let bound = bind(params);
        let command = Operation::from_sql(sql).filter(|op| *op != Operation::Select);

        match command {
            Some(op) if statement.columns().is_empty() => {
                let row_count = self.client.execute(&statement, &bound).await?;
                Ok(NativeResult::Command {
                    command: op.as_str().to_ascii_uppercase(),
                    row_count,
                    rows: Vec::new(),
                })
            }
            Some(op) => {
                let rows = decode_rows(self.client.query(&statement, &bound).await?)?;
                Ok(NativeResult::Command {
                    command: op.as_str().to_ascii_uppercase(),
                    row_count: rows.len() as u64,
                    rows,
                })
            }
            None => {
                let rows = decode_rows(self.client.query(&statement, &bound).await?)?;
                Ok(NativeResult::Rows(rows))
            }
        }
    }

    async fn batch(&mut self, sql: &str) -> DbResult<()> {
        self.client.batch_execute(sql).await?;
        Ok(())
    }

    async fn cursor<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> DbResult<Box<dyn RowCursor + 'a>> {
        let statement = self.client.prepare_cached(sql).await?;
        let stream = self
            .client
            .query_raw(&statement, bind(params).into_iter())
            .await?;
        Ok(Box::new(PgCursor {
            stream: Some(Box::pin(stream)),
        }))
    }
}

/// Pull-based: rows are read from the socket only as `next_row` is polled,
/// so pausing needs no extra bookkeeping.
struct PgCursor {
    stream: Option<Pin<Box<RowStream>>>,
}

#[async_trait]
impl RowCursor for PgCursor {
    async fn next_row(&mut self) -> DbResult<Option<Record>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match std::future::poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
            Some(Ok(row)) => decode_row(&row).map(Some),
            Some(Err(err)) => {
                self.stream = None;
                Err(DbError::stream(err))
            }
            None => {
                self.stream = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> DbResult<()> {
        self.stream = None;
        Ok(())
    }
}

fn decode_rows(rows: Vec<Row>) -> DbResult<Vec<Record>> {
    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &Row) -> DbResult<Record> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_())
            .map_err(|e| DbError::decode(column.name(), e.to_string()))?;
        record.push(column.name(), value);
    }
    Ok(record)
}

fn decode_value(row: &Row, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.into(),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.into(),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(i64::from).into(),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(f64::from).into(),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.into(),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.into(),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<serde_json::Value>>(idx)?.into(),
        Type::TIMESTAMPTZ => row.try_get::<_, Option<DateTime<Utc>>>(idx)?.into(),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| ts.and_utc())
            .into(),
        Type::UUID => row.try_get::<_, Option<uuid::Uuid>>(idx)?.into(),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    };
    Ok(value)
}
