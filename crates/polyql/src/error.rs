//! Error types for polyql

use std::error::Error as StdError;
use thiserror::Error;

/// Boxed native error carried through from a connection layer.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias for polyql operations
pub type DbResult<T> = Result<T, DbError>;

/// Error types for query compilation and execution
#[derive(Debug, Error)]
pub enum DbError {
    /// A statement was rendered before a table or subquery target was set
    #[error("No target: a table or subquery must be set before rendering")]
    NoTarget,

    /// Commit or rollback without an active transaction
    #[error("No transaction in progress")]
    NoTransaction,

    /// Malformed input (empty column set, mismatched rows, bad paging, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Native driver error, carried verbatim
    #[error("{0}")]
    Execution(#[source] BoxError),

    /// Error raised by a streaming cursor
    #[error("Stream error: {0}")]
    Stream(#[source] BoxError),

    /// Connection could not be acquired or opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// No configuration registered under this name
    #[error("Unknown connection config '{0}'")]
    UnknownConfig(String),

    /// Configuration could not be parsed or expanded
    #[error("Config error: {0}")]
    Config(String),

    /// A record value could not be converted
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),
}

impl DbError {
    /// Wrap a native driver error.
    pub fn execution<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Execution(Box::new(err))
    }

    /// Wrap a cursor error.
    pub fn stream<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Stream(Box::new(err))
    }

    /// Create an invalid argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a missing target error
    pub fn is_no_target(&self) -> bool {
        matches!(self, Self::NoTarget)
    }

    /// Check if this is a missing transaction error
    pub fn is_no_transaction(&self) -> bool {
        matches!(self, Self::NoTransaction)
    }

    /// Check if this is an invalid argument error
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this wraps a native driver error
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Downcast the wrapped native error, if any.
    pub fn native<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Execution(err) | Self::Stream(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for DbError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::execution(err)
    }
}
