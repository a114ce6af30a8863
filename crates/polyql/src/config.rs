//! Named connection configuration.
//!
//! Configurations are plain serde structs, loadable from TOML:
//!
//! ```toml
//! [connections.main]
//! dialect = "postgres"
//! host = "localhost"
//! port = 5432
//! database = "app"
//! user = "app"
//! password = "${APP_DB_PASSWORD}"
//! max_connections = 16
//! ```
//!
//! `${VAR}` references in string fields are expanded from the environment
//! when a file is loaded.

use crate::dialect::DialectKind;
use crate::error::{DbError, DbResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_max_connections() -> usize {
    16
}

/// Credentials and pool size for one named connection.
#[derive(Clone, Deserialize)]
pub struct ConnectionConfig {
    pub dialect: DialectKind,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port())
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(dialect: DialectKind) -> Self {
        Self {
            dialect,
            host: default_host(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            max_connections: default_max_connections(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Configured port, or the dialect's default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.dialect {
            DialectKind::MySql => 3306,
            DialectKind::Postgres => 5432,
        })
    }

    fn expand_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> DbResult<()> {
        self.host = expand_env_vars(&self.host, lookup)?;
        self.database = expand_env_vars(&self.database, lookup)?;
        self.user = expand_env_vars(&self.user, lookup)?;
        self.password = expand_env_vars(&self.password, lookup)?;
        Ok(())
    }

    pub(crate) fn validate(&self, name: &str) -> DbResult<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::Config(format!(
                "connection '{name}': database must not be empty"
            )));
        }
        if self.max_connections == 0 {
            return Err(DbError::Config(format!(
                "connection '{name}': max_connections must be at least 1"
            )));
        }
        Ok(())
    }
}

/// A set of named connections, as read from a config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl RegistryConfig {
    /// Parse TOML, expanding `${VAR}` from the process environment.
    pub fn from_toml_str(raw: &str) -> DbResult<Self> {
        Self::from_toml_str_with(raw, |key| std::env::var(key).ok())
    }

    /// Parse TOML, expanding `${VAR}` through `lookup`.
    pub fn from_toml_str_with(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config: RegistryConfig =
            toml::from_str(raw).map_err(|e| DbError::Config(format!("failed to parse config: {e}")))?;
        for (name, conn) in config.connections.iter_mut() {
            conn.expand_env(&lookup)?;
            conn.validate(name)?;
        }
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DbError::Config(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }
}

fn expand_env_vars(input: &str, lookup: &impl Fn(&str) -> Option<String>) -> DbResult<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();

            let mut key = String::new();
            let mut closed = false;
            for ch in chars.by_ref() {
                if ch == '}' {
                    closed = true;
                    break;
                }
                key.push(ch);
            }

            if !closed {
                return Err(DbError::Config(format!(
                    "unterminated env var reference: ${{{key}}}"
                )));
            }
            if key.is_empty() {
                return Err(DbError::Config("invalid env var reference: ${}".into()));
            }

            let v = lookup(&key).ok_or_else(|| {
                DbError::Config(format!("missing env var for config expansion: {key}"))
            })?;
            out.push_str(&v);
            continue;
        }

        out.push(c);
    }

    Ok(out)
}
