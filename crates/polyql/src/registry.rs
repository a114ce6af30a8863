//! Registry of named connections.
//!
//! A [`Registry`] is an injected service: it maps connection names to their
//! configuration, dialect, lazily opened pool and hooks. Pools open the first
//! time a query on that name needs a connection and stay open until
//! [`Registry::close_pool`], [`Registry::remove_config`] or
//! [`Registry::close_all`].
//!
//! # Example
//!
//! ```ignore
//! use polyql::{Comparator, Registry, RegistryConfig};
//!
//! let registry = Registry::from_config(RegistryConfig::load("db.toml")?).await?;
//! let mut q = registry.start_query("main")?;
//! let users = q.table("users").where_("active", Comparator::Eq, true).fetch().await?;
//! ```

use crate::config::{ConnectionConfig, RegistryConfig};
use crate::connection::{ConnectionPool, Connector};
use crate::dialect::{Dialect, DialectKind};
use crate::error::{DbError, DbResult};
use crate::hooks::{AfterHook, BeforeHook, Hooks};
use crate::query::Query;
use crate::state::Operation;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Everything a query needs to reach one named connection.
pub(crate) struct Backend {
    name: String,
    config: ConnectionConfig,
    dialect: Arc<dyn Dialect>,
    connector: Arc<dyn Connector>,
    pool: Mutex<Option<Arc<dyn ConnectionPool>>>,
    hooks: RwLock<Hooks>,
}

impl Backend {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// The pool, opened on first use.
    pub(crate) fn pool(&self) -> DbResult<Arc<dyn ConnectionPool>> {
        let mut slot = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = self.connector.open_pool(&self.name, &self.config)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(target: "polyql", connection = %self.name, dialect = %self.config.dialect, "opened pool");
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    pub(crate) async fn close(&self) {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close().await;
            #[cfg(feature = "tracing")]
            tracing::debug!(target: "polyql", connection = %self.name, "closed pool");
        }
    }

    /// Snapshot of the current hooks.
    pub(crate) fn hooks(&self) -> Hooks {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_hooks(&self, f: impl FnOnce(&mut Hooks)) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut hooks);
    }
}

/// Named connections, their pools and their hooks.
pub struct Registry {
    backends: RwLock<HashMap<String, Arc<Backend>>>,
    connectors: RwLock<HashMap<DialectKind, Arc<dyn Connector>>>,
}

impl Default for Registry {
    fn default() -> Self {
        let registry = Self {
            backends: RwLock::new(HashMap::new()),
            connectors: RwLock::new(HashMap::new()),
        };
        #[cfg(feature = "pool")]
        registry.register_connector(
            DialectKind::Postgres,
            Arc::new(crate::postgres::PostgresConnector::new()),
        );
        registry
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("connections", &self.names())
            .finish()
    }
}

impl Registry {
    /// An empty registry. With feature `pool` the Postgres connector is pre-registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every connection in `config`.
    pub async fn from_config(config: RegistryConfig) -> DbResult<Self> {
        let registry = Self::new();
        registry.load(config).await?;
        Ok(registry)
    }

    /// Register every connection in `config`.
    pub async fn load(&self, config: RegistryConfig) -> DbResult<()> {
        for (name, conn) in config.connections {
            self.add_config(name, conn).await?;
        }
        Ok(())
    }

    /// Set how pools are opened for `kind`.
    pub fn register_connector(&self, kind: DialectKind, connector: Arc<dyn Connector>) {
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, connector);
    }

    /// Builder-style [`Registry::register_connector`].
    pub fn with_connector(self, kind: DialectKind, connector: Arc<dyn Connector>) -> Self {
        self.register_connector(kind, connector);
        self
    }

    /// Register `config` under `name`, using the default dialect for its kind.
    ///
    /// Replacing an existing name closes its pool first.
    pub async fn add_config(&self, name: impl Into<String>, config: ConnectionConfig) -> DbResult<()> {
        let dialect = config.dialect.dialect();
        self.add_config_with_dialect(name, config, dialect).await
    }

    /// Register `config` under `name` with a custom dialect instance.
    pub async fn add_config_with_dialect(
        &self,
        name: impl Into<String>,
        config: ConnectionConfig,
        dialect: Arc<dyn Dialect>,
    ) -> DbResult<()> {
        let name = name.into();
        config.validate(&name)?;
        let connector = self
            .connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.dialect)
            .cloned()
            .ok_or_else(|| {
                DbError::Config(format!("no connector registered for dialect '{}'", config.dialect))
            })?;

        let backend = Arc::new(Backend {
            name: name.clone(),
            config,
            dialect,
            connector,
            pool: Mutex::new(None),
            hooks: RwLock::new(Hooks::new()),
        });

        let previous = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, backend);
        if let Some(previous) = previous {
            previous.close().await;
        }
        Ok(())
    }

    /// Close the pool for `name` and forget it.
    pub async fn remove_config(&self, name: &str) -> DbResult<()> {
        let removed = self
            .backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match removed {
            Some(backend) => {
                backend.close().await;
                Ok(())
            }
            None => Err(DbError::UnknownConfig(name.to_string())),
        }
    }

    /// Close the pool for `name`; the next query on it reopens one.
    pub async fn close_pool(&self, name: &str) -> DbResult<()> {
        self.backend(name)?.close().await;
        Ok(())
    }

    /// Close every pool.
    pub async fn close_all(&self) {
        let backends: Vec<_> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for backend in backends {
            backend.close().await;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn add_before_hook(
        &self,
        name: &str,
        operation: Operation,
        hook: Arc<dyn BeforeHook>,
    ) -> DbResult<()> {
        self.backend(name)?
            .with_hooks(|hooks| hooks.add_before(operation, hook));
        Ok(())
    }

    pub fn add_after_hook(
        &self,
        name: &str,
        operation: Operation,
        hook: Arc<dyn AfterHook>,
    ) -> DbResult<()> {
        self.backend(name)?
            .with_hooks(|hooks| hooks.add_after(operation, hook));
        Ok(())
    }

    /// A fresh query on the named connection.
    pub fn start_query(&self, name: &str) -> DbResult<Query> {
        Ok(Query::new(self.backend(name)?))
    }

    fn backend(&self, name: &str) -> DbResult<Arc<Backend>> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnknownConfig(name.to_string()))
    }
}
