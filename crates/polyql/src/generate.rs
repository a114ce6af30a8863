//! Statement generation.
//!
//! [`Generator`] renders a [`QueryState`] for one dialect. Rendering never
//! touches the state: the [`ParamCounter`] is threaded through each stage and
//! every stage appends its values to one list in the order its placeholders
//! appear in the text.

use crate::condition::{Comparator, ConditionSequence};
use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::param::{Binder, Fragment, ParamCounter};
use crate::state::{JoinCondition, Operation, Payload, QueryState, Target};
use crate::value::Value;
use crate::weighted::{WEIGHT_COLUMN, render_weight_column};

/// Renders query state into SQL for one dialect.
#[derive(Clone, Copy)]
pub struct Generator<'a> {
    dialect: &'a dyn Dialect,
}

impl<'a> Generator<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> &'a dyn Dialect {
        self.dialect
    }

    /// Render the statement for `operation`.
    pub fn statement(&self, state: &QueryState, operation: Operation) -> DbResult<Fragment> {
        match operation {
            Operation::Select => self.select(state),
            Operation::Insert => self.insert(state),
            Operation::Update => self.update(state),
            Operation::Delete => self.delete(state),
        }
    }

    /// SELECT with a fresh counter.
    pub fn select(&self, state: &QueryState) -> DbResult<Fragment> {
        Ok(self.select_with(state, self.dialect.param_counter())?.0)
    }

    /// SELECT continuing from `counter`, for use inside another statement.
    pub fn select_with(
        &self,
        state: &QueryState,
        counter: ParamCounter,
    ) -> DbResult<(Fragment, ParamCounter)> {
        let target = state.target.as_ref().ok_or(DbError::NoTarget)?;
        let d = self.dialect;
        let mut out = Binder::new(counter);

        out.push("SELECT ");
        let columns = state
            .columns
            .iter()
            .map(|c| d.escape_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        out.push(&columns);
        if !state.weighted.is_empty() {
            if !columns.is_empty() {
                out.push(", ");
            }
            render_weight_column(&state.weighted, d, &mut out)?;
        }

        out.push(" FROM ");
        self.render_target(target, &mut out)?;

        for join in &state.joins {
            out.push_char(' ');
            out.push(join.kind.keyword());
            out.push_char(' ');
            self.render_target(&join.target, &mut out)?;
            self.render_join_condition(&join.condition, &mut out)?;
        }

        if !state.conditions.is_empty() {
            out.push(" WHERE ");
            state.conditions.render_into(d, &mut out)?;
        }

        if !state.group_by.is_empty() {
            out.push(" GROUP BY ");
            out.push(&self.identifier_list(&state.group_by));
        }

        if !state.having.is_empty() {
            out.push(" HAVING ");
            state.having.render_into(d, &mut out)?;
        }

        let mut ordering = Vec::with_capacity(state.ordering.len() + 1);
        if !state.weighted.is_empty() {
            ordering.push(format!("{WEIGHT_COLUMN} DESC"));
        }
        ordering.extend(
            state
                .ordering
                .iter()
                .map(|o| format!("{} {}", d.escape_identifier(&o.field), o.direction.keyword())),
        );
        if !ordering.is_empty() {
            out.push(" ORDER BY ");
            out.push(&ordering.join(", "));
        }

        if let Some(limit) = state.limit {
            out.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = state.offset {
            out.push(&format!(" OFFSET {offset}"));
        }

        Ok(out.finish())
    }

    /// INSERT of one or more rows; every row must list the same columns in the same order.
    pub fn insert(&self, state: &QueryState) -> DbResult<Fragment> {
        let table = self.write_target(state, "insert")?;
        let Payload::Insert { rows, escaped } = &state.payload else {
            return Err(DbError::invalid("insert requires at least one row"));
        };
        let Some(first) = rows.first() else {
            return Err(DbError::invalid("insert requires at least one row"));
        };
        if first.is_empty() {
            return Err(DbError::invalid("insert requires at least one column"));
        }
        for (i, row) in rows.iter().enumerate().skip(1) {
            if !row.columns().eq(first.columns()) {
                return Err(DbError::invalid(format!(
                    "insert row {i} does not match the columns of row 0"
                )));
            }
        }

        let d = self.dialect;
        let mut out = Binder::new(d.param_counter());
        out.push("INSERT INTO ");
        out.push(&d.escape_identifier(table));
        out.push(" (");
        out.push(
            &first
                .columns()
                .map(|c| d.escape_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
        );
        out.push(") VALUES ");
        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push_char('(');
            for (j, (_, value)) in row.iter().enumerate() {
                if j > 0 {
                    out.push(", ");
                }
                out.value(value, *escaped);
            }
            out.push_char(')');
        }

        if let Some(field) = state.incrementing_field.as_deref() {
            if d.supports_returning() {
                out.push(" RETURNING ");
                out.push(&d.escape_identifier(field));
            }
        }

        Ok(out.finish().0)
    }

    /// UPDATE; WHERE placeholders continue after the SET placeholders.
    pub fn update(&self, state: &QueryState) -> DbResult<Fragment> {
        let table = self.write_target(state, "update")?;
        let Payload::Update { values, escaped } = &state.payload else {
            return Err(DbError::invalid("update requires at least one column"));
        };
        if values.is_empty() {
            return Err(DbError::invalid("update requires at least one column"));
        }

        let d = self.dialect;
        let mut out = Binder::new(d.param_counter());
        out.push("UPDATE ");
        out.push(&d.escape_identifier(table));
        out.push(" SET ");
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                out.push(", ");
            }
            out.push(&d.escape_identifier(column));
            out.push(" = ");
            out.value(value, *escaped);
        }
        if !state.conditions.is_empty() {
            out.push(" WHERE ");
            state.conditions.render_into(d, &mut out)?;
        }
        Ok(out.finish().0)
    }

    pub fn delete(&self, state: &QueryState) -> DbResult<Fragment> {
        let table = self.write_target(state, "delete")?;
        let d = self.dialect;
        let mut out = Binder::new(d.param_counter());
        out.push("DELETE FROM ");
        out.push(&d.escape_identifier(table));
        if !state.conditions.is_empty() {
            out.push(" WHERE ");
            state.conditions.render_into(d, &mut out)?;
        }
        Ok(out.finish().0)
    }

    /// `SELECT COUNT(*) num FROM (<select>) count_sql`.
    pub fn count(&self, state: &QueryState) -> DbResult<Fragment> {
        if state.target.is_none() {
            return Err(DbError::NoTarget);
        }
        self.select(&state.count_query())
    }

    fn write_target<'s>(&self, state: &'s QueryState, verb: &str) -> DbResult<&'s str> {
        match state.target.as_ref() {
            None => Err(DbError::NoTarget),
            Some(Target::Table(name)) => Ok(name),
            Some(Target::SubQuery { .. }) => Err(DbError::invalid(format!(
                "cannot {verb} a subquery target"
            ))),
        }
    }

    fn render_target(&self, target: &Target, out: &mut Binder) -> DbResult<()> {
        match target {
            Target::Table(name) => out.push(&self.dialect.escape_identifier(name)),
            Target::SubQuery { query, alias } => {
                out.push_char('(');
                let (fragment, counter) = self.select_with(query, out.counter())?;
                out.absorb(fragment, counter);
                out.push(") ");
                out.push(&self.dialect.escape_identifier(alias));
            }
        }
        Ok(())
    }

    fn render_join_condition(&self, condition: &JoinCondition, out: &mut Binder) -> DbResult<()> {
        match condition {
            JoinCondition::Keys { primary, foreign } => {
                let mut seq = ConditionSequence::new();
                seq.on(
                    primary.as_str(),
                    Comparator::Eq,
                    Value::Text(self.dialect.escape_identifier(foreign)),
                );
                out.push(" ON ");
                seq.render_into(self.dialect, out)
            }
            JoinCondition::Custom(seq) if seq.is_empty() => Ok(()),
            JoinCondition::Custom(seq) => {
                out.push(" ON ");
                seq.render_into(self.dialect, out)
            }
        }
    }

    fn identifier_list(&self, fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| self.dialect.escape_identifier(f))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests;
