use super::{AfterHook, BeforeHook, HookAction, QueryEvent};
use crate::record::ResultSet;
use async_trait::async_trait;
use tracing::Level;

/// A `tracing` hook that logs each statement before it runs and its counters afterwards.
///
/// Register it for any operation with `add_before_hook` / `add_after_hook`.
#[derive(Debug, Clone)]
pub struct TracingHook {
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for TracingHook {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            max_sql_length: Some(200),
        }
    }
}

impl TracingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }
}

/// Dispatch a tracing event at a runtime-determined level.
macro_rules! emit_at_level {
    ($level:expr, $($field:tt)*) => {
        match $level {
            Level::ERROR => tracing::error!($($field)*),
            Level::WARN  => tracing::warn!($($field)*),
            Level::INFO  => tracing::info!($($field)*),
            Level::DEBUG => tracing::debug!($($field)*),
            Level::TRACE => tracing::trace!($($field)*),
        }
    };
}

#[async_trait]
impl BeforeHook for TracingHook {
    async fn before(&self, event: &QueryEvent) -> HookAction {
        let sql = self.truncate_sql(event.sql());
        emit_at_level!(
            self.level,
            target: "polyql.sql",
            operation = event.operation().as_str(),
            table = event.table(),
            param_count = event.params().len(),
            sql = %sql,
        );
        HookAction::Continue
    }
}

#[async_trait]
impl AfterHook for TracingHook {
    async fn after(&self, event: &QueryEvent, result: &ResultSet) {
        emit_at_level!(
            self.level,
            target: "polyql.sql",
            operation = event.operation().as_str(),
            table = event.table(),
            rows = result.rows.len(),
            rows_affected = result.rows_affected,
            insert_id = result.insert_id,
            "statement completed"
        );
    }
}

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
