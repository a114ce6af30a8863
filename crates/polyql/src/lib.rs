//! # polyql
//!
//! A dialect-agnostic SQL query builder and executor.
//!
//! ## Features
//!
//! - **One builder, many dialects**: the same query renders with `?` for MySQL
//!   or `$1, $2, ...` for Postgres, with dialect-specific identifier quoting
//! - **Ordered conditions**: AND/OR keywords and brackets are kept in call order
//! - **Weighted relevance**: score rows with nested conditional weights and
//!   order by the score
//! - **Composable**: subqueries in FROM, JOIN and IN share one placeholder sequence
//! - **Hooks**: before-hooks can halt a statement; after-hooks see the result
//! - **Transactions and streaming**: pinned connections and chunked,
//!   backpressure-aware row delivery
//!
//! ## Example
//!
//! ```ignore
//! use polyql::{Comparator, ConnectionConfig, DialectKind, Direction, Registry};
//!
//! let registry = Registry::new();
//! registry
//!     .add_config(
//!         "main",
//!         ConnectionConfig::new(DialectKind::Postgres)
//!             .with_database("app")
//!             .with_user("app"),
//!     )
//!     .await?;
//!
//! let mut q = registry.start_query("main")?;
//! q.table("users")
//!     .where_("age", Comparator::Gt, 30)
//!     .or()
//!     .where_null("deleted_at")
//!     .order_by("name", Direction::Asc)
//!     .limit(10);
//! let rows = q.fetch().await?;
//! ```

pub mod condition;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod generate;
pub mod hooks;
pub mod param;
pub mod query;
pub mod record;
pub mod registry;
pub mod state;
pub mod value;
pub mod weighted;

#[cfg(feature = "pool")]
pub mod postgres;

pub use condition::{Comparator, ConditionNode, ConditionSequence, Membership};
pub use config::{ConnectionConfig, RegistryConfig};
pub use connection::{Connection, ConnectionPool, Connector, RowCursor};
pub use dialect::{Dialect, DialectKind};
pub use error::{DbError, DbResult};
pub use generate::Generator;
pub use hooks::{AfterHook, BeforeHook, HookAction, QueryEvent};
pub use param::{Fragment, ParamCounter, PlaceholderStyle};
pub use query::{Pagination, Query, StreamControl};
pub use record::{FromRecord, FromValue, NativeResult, Record, ResultSet};
pub use registry::Registry;
pub use state::{ColumnValues, Direction, JoinCondition, JoinKind, Operation, QueryState, Target};
pub use value::Value;
pub use weighted::{Otherwise, WeightedCondition};

#[cfg(feature = "tracing")]
pub use hooks::TracingHook;

#[cfg(feature = "pool")]
pub use postgres::PostgresConnector;
