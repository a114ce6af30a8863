//! SQL dialects: placeholder style, identifier quoting and dialect-specific syntax.
//!
//! Two dialects ship with the crate:
//!
//! - [`MySql`]: anonymous `?` placeholders, backtick quoting, `IF(...)`.
//! - [`Postgres`]: numbered `$n` placeholders, double-quote quoting,
//!   `CASE WHEN ...`, `RETURNING`.
//!
//! Query state is dialect-agnostic; a [`Dialect`] is consulted only while
//! rendering.

mod mysql;
mod postgres;

use crate::param::ParamCounter;
use crate::record::{NativeResult, ResultSet};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub use mysql::MySql;
pub use postgres::Postgres;

/// Which dialect a named connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
}

impl DialectKind {
    /// The default dialect implementation for this kind.
    pub fn dialect(self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::MySql => Arc::new(MySql::new()),
            DialectKind::Postgres => Arc::new(Postgres::new()),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::MySql => f.write_str("mysql"),
            DialectKind::Postgres => f.write_str("postgres"),
        }
    }
}

/// Reserved words quoted when they appear as identifier segments.
#[derive(Debug, Clone)]
pub struct ReservedWords(HashSet<String>);

impl ReservedWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            words
                .into_iter()
                .map(|w| w.as_ref().to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn insert(&mut self, word: &str) {
        self.0.insert(word.to_ascii_lowercase());
    }

    pub fn contains(&self, word: &str) -> bool {
        self.0.contains(&word.to_ascii_lowercase())
    }
}

/// Words both dialects quote by default.
pub(crate) const COMMON_RESERVED: &[&str] = &[
    "select", "insert", "delete", "update", "where", "table", "join", "order", "read", "check",
];

/// Dialect contract shared by every backend.
pub trait Dialect: fmt::Debug + Send + Sync {
    fn kind(&self) -> DialectKind;

    /// A fresh counter for a top-level statement.
    fn param_counter(&self) -> ParamCounter;

    fn quote_char(&self) -> char;

    fn is_reserved(&self, word: &str) -> bool;

    /// `test ? then : otherwise` as a SQL expression.
    fn conditional(&self, test: &str, then: &str, otherwise: &str) -> String;

    /// Whether INSERT can report generated keys with `RETURNING`.
    fn supports_returning(&self) -> bool {
        false
    }

    fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    fn commit_statement(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_statement(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Quote reserved segments of an identifier.
    ///
    /// `a.b` is split on `.` and each segment checked on its own; a trailing
    /// ` alias` is split off and escaped separately.
    fn escape_identifier(&self, ident: &str) -> String {
        escape_identifier(self, ident)
    }

    /// Map connection metadata into the uniform result shape.
    fn map_result(&self, native: NativeResult, incrementing_field: Option<&str>) -> ResultSet {
        map_native_result(native, incrementing_field)
    }
}

pub(crate) fn escape_identifier<D: Dialect + ?Sized>(dialect: &D, ident: &str) -> String {
    let ident = ident.trim();
    if let Some((head, alias)) = ident.rsplit_once(' ') {
        let head = head.trim_end();
        if head.is_empty() {
            return escape_segment(dialect, alias);
        }
        return format!(
            "{} {}",
            escape_identifier(dialect, head),
            escape_segment(dialect, alias)
        );
    }

    ident
        .split('.')
        .map(|segment| escape_segment(dialect, segment))
        .collect::<Vec<_>>()
        .join(".")
}

fn escape_segment<D: Dialect + ?Sized>(dialect: &D, segment: &str) -> String {
    if dialect.is_reserved(segment) {
        let q = dialect.quote_char();
        format!("{q}{segment}{q}")
    } else {
        segment.to_string()
    }
}

pub(crate) fn map_native_result(
    native: NativeResult,
    incrementing_field: Option<&str>,
) -> ResultSet {
    match native {
        NativeResult::Rows(rows) => ResultSet::from_rows(rows),
        NativeResult::Ok {
            affected_rows,
            changed_rows,
            insert_id,
        } => ResultSet {
            insert_id: i64::try_from(insert_id).unwrap_or(i64::MAX),
            rows_affected: affected_rows,
            rows_changed: changed_rows,
            rows: Vec::new(),
        },
        NativeResult::Command {
            command,
            row_count,
            rows,
        } => {
            let keyword = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            match keyword.as_str() {
                "INSERT" => {
                    let insert_id = incrementing_field
                        .and_then(|field| rows.first().and_then(|r| r.get(field)))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    ResultSet {
                        insert_id,
                        rows_affected: row_count,
                        rows_changed: row_count,
                        rows,
                    }
                }
                "UPDATE" | "DELETE" => ResultSet {
                    insert_id: 0,
                    rows_affected: row_count,
                    rows_changed: row_count,
                    rows,
                },
                _ => ResultSet::from_rows(rows),
            }
        }
    }
}

#[cfg(test)]
mod tests;
