//! Dialect-agnostic query state.
//!
//! [`QueryState`] is the builder behind [`crate::Query`]: every fluent call
//! records intent here, and [`crate::Generator`] turns it into SQL for a
//! given dialect. Identifiers are stored as written and escaped at render time.

use crate::condition::{Comparator, ConditionSequence, Membership};
use crate::value::Value;
use crate::weighted::{Otherwise, WeightedCondition};

/// Statement kind, set by the last terminal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Detect the statement kind from its leading keyword.
    pub fn from_sql(sql: &str) -> Option<Self> {
        let word = strip_sql_prefix(sql)
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default();
        if word.eq_ignore_ascii_case("SELECT") || word.eq_ignore_ascii_case("WITH") {
            Some(Operation::Select)
        } else if word.eq_ignore_ascii_case("INSERT") {
            Some(Operation::Insert)
        } else if word.eq_ignore_ascii_case("UPDATE") {
            Some(Operation::Update)
        } else if word.eq_ignore_ascii_case("DELETE") {
            Some(Operation::Delete)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Skip leading whitespace, comments and parentheses.
fn strip_sql_prefix(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            match rest.find('\n') {
                Some(pos) => s = &rest[pos + 1..],
                None => return "",
            }
        } else if let Some(rest) = s.strip_prefix("/*") {
            match rest.find("*/") {
                Some(pos) => s = &rest[pos + 2..],
                None => return "",
            }
        } else if let Some(rest) = s.strip_prefix('(') {
            s = rest;
        }
        if s == before {
            return s;
        }
    }
}

/// What a statement reads from or writes to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Table(String),
    SubQuery {
        query: Box<QueryState>,
        alias: String,
    },
}

impl Target {
    pub fn table(name: impl Into<String>) -> Self {
        Target::Table(name.into())
    }

    /// Snapshot `query` as a derived table.
    pub fn subquery(query: &QueryState, alias: impl Into<String>) -> Self {
        Target::SubQuery {
            query: Box::new(query.clone()),
            alias: alias.into(),
        }
    }

    /// Table name, or the alias of a derived table.
    pub fn name(&self) -> &str {
        match self {
            Target::Table(name) => name,
            Target::SubQuery { alias, .. } => alias,
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::table(name)
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Table(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// How a join matches rows.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    /// `primary = foreign`, both identifiers.
    Keys { primary: String, foreign: String },
    /// Arbitrary condition sequence.
    Custom(ConditionSequence),
}

impl JoinCondition {
    pub fn keys(primary: impl Into<String>, foreign: impl Into<String>) -> Self {
        JoinCondition::Keys {
            primary: primary.into(),
            foreign: foreign.into(),
        }
    }

    /// Build the condition with a closure.
    pub fn custom(build: impl FnOnce(&mut ConditionSequence)) -> Self {
        let mut seq = ConditionSequence::new();
        build(&mut seq);
        JoinCondition::Custom(seq)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub target: Target,
    pub condition: JoinCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn keyword(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Ordered column/value pairs for INSERT rows and UPDATE SET lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnValues(Vec<(String, Value)>);

impl ColumnValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column; an existing column keeps its position and takes the new value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.0.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.0.push((column, value)),
        }
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ColumnValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ColumnValues::new(), |acc, (k, v)| acc.set(k, v))
    }
}

impl<K: Into<String>, V: Into<Value>> From<Vec<(K, V)>> for ColumnValues {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

/// Write payload of an INSERT or UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    Insert {
        rows: Vec<ColumnValues>,
        escaped: bool,
    },
    Update {
        values: ColumnValues,
        escaped: bool,
    },
}

/// Full description of one statement before rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub(crate) operation: Operation,
    pub(crate) target: Option<Target>,
    pub(crate) columns: Vec<String>,
    pub(crate) joins: Vec<Join>,
    pub(crate) conditions: ConditionSequence,
    pub(crate) having: ConditionSequence,
    pub(crate) weighted: Vec<WeightedCondition>,
    pub(crate) group_by: Vec<String>,
    pub(crate) ordering: Vec<OrderBy>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) payload: Payload,
    pub(crate) incrementing_field: Option<String>,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            operation: Operation::Select,
            target: None,
            columns: vec!["*".to_string()],
            joins: Vec::new(),
            conditions: ConditionSequence::new(),
            having: ConditionSequence::new(),
            weighted: Vec::new(),
            group_by: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: None,
            payload: Payload::None,
            incrementing_field: None,
        }
    }
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State targeting `table`.
    pub fn from_table(table: impl Into<String>) -> Self {
        let mut state = Self::new();
        state.table(table);
        state
    }

    // ==================== Accessors ====================

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn selected_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn conditions(&self) -> &ConditionSequence {
        &self.conditions
    }

    pub fn having_conditions(&self) -> &ConditionSequence {
        &self.having
    }

    pub fn weighted_conditions(&self) -> &[WeightedCondition] {
        &self.weighted
    }

    pub fn group_fields(&self) -> &[String] {
        &self.group_by
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.ordering
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn incrementing_field(&self) -> Option<&str> {
        self.incrementing_field.as_deref()
    }

    // ==================== Target & columns ====================

    pub fn table(&mut self, name: impl Into<String>) -> &mut Self {
        self.target = Some(Target::Table(name.into()));
        self
    }

    /// Select from a snapshot of `query` aliased as `alias`.
    pub fn from_subquery(&mut self, query: &QueryState, alias: impl Into<String>) -> &mut Self {
        self.target = Some(Target::subquery(query, alias));
        self
    }

    pub fn set_operation(&mut self, operation: Operation) -> &mut Self {
        self.operation = operation;
        self
    }

    /// Replace the select list.
    pub fn columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Append a column, replacing the implicit `*`.
    pub fn add_column(&mut self, column: impl Into<String>) -> &mut Self {
        if self.columns.len() == 1 && self.columns[0] == "*" {
            self.columns.clear();
        }
        self.columns.push(column.into());
        self
    }

    pub fn remove_column(&mut self, column: &str) -> &mut Self {
        self.columns.retain(|c| c != column);
        self
    }

    pub fn remove_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let drop: Vec<S> = columns.into_iter().collect();
        self.columns
            .retain(|c| !drop.iter().any(|d| d.as_ref() == c.as_str()));
        self
    }

    /// Keep only the listed columns, preserving the current order.
    pub fn keep_columns<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keep: Vec<S> = columns.into_iter().collect();
        self.columns
            .retain(|c| keep.iter().any(|k| k.as_ref() == c.as_str()));
        self
    }

    // ==================== Joins ====================

    pub fn join(
        &mut self,
        target: impl Into<Target>,
        condition: JoinCondition,
    ) -> &mut Self {
        self.add_join(JoinKind::Inner, target.into(), condition)
    }

    pub fn left_join(
        &mut self,
        target: impl Into<Target>,
        condition: JoinCondition,
    ) -> &mut Self {
        self.add_join(JoinKind::Left, target.into(), condition)
    }

    pub fn add_join(&mut self, kind: JoinKind, target: Target, condition: JoinCondition) -> &mut Self {
        self.joins.push(Join {
            kind,
            target,
            condition,
        });
        self
    }

    // ==================== WHERE ====================

    /// Bound comparison.
    pub fn where_(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.conditions.where_(field, comparator, value);
        self
    }

    /// Inlined comparison.
    pub fn where_literal(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.conditions.on(field, comparator, value);
        self
    }

    pub fn where_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.conditions.is_null(field);
        self
    }

    pub fn where_not_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.conditions.is_not_null(field);
        self
    }

    pub fn where_in(&mut self, field: impl Into<String>, source: impl Into<Membership>) -> &mut Self {
        self.conditions.in_(field, source);
        self
    }

    pub fn where_not_in(
        &mut self,
        field: impl Into<String>,
        source: impl Into<Membership>,
    ) -> &mut Self {
        self.conditions.not_in(field, source);
        self
    }

    pub fn or(&mut self) -> &mut Self {
        self.conditions.or();
        self
    }

    pub fn and(&mut self) -> &mut Self {
        self.conditions.and();
        self
    }

    pub fn open_bracket(&mut self) -> &mut Self {
        self.conditions.open_bracket();
        self
    }

    pub fn close_bracket(&mut self) -> &mut Self {
        self.conditions.close_bracket();
        self
    }

    /// Edit the WHERE sequence directly.
    pub fn conditions_mut(&mut self) -> &mut ConditionSequence {
        &mut self.conditions
    }

    /// Append another query's WHERE nodes to this one.
    pub fn copy_constraints(&mut self, other: &QueryState) -> &mut Self {
        self.conditions.extend_from(&other.conditions);
        self
    }

    // ==================== Weighted ====================

    pub fn weighted_where(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> &mut Self {
        self.weighted
            .push(WeightedCondition::new(field, comparator, value, weight, otherwise));
        self
    }

    /// Weighted condition whose value is inlined rather than bound.
    pub fn weighted_where_literal(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> &mut Self {
        self.weighted
            .push(WeightedCondition::literal(field, comparator, value, weight, otherwise));
        self
    }

    pub fn add_weighted(&mut self, condition: WeightedCondition) -> &mut Self {
        self.weighted.push(condition);
        self
    }

    // ==================== Grouping & ordering ====================

    pub fn group_by<I, S>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Edit the HAVING sequence.
    pub fn having(&mut self) -> &mut ConditionSequence {
        &mut self.having
    }

    pub fn order_by(&mut self, field: impl Into<String>, direction: Direction) -> &mut Self {
        self.ordering.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(&mut self, n: u64) -> &mut Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(&mut self, n: u64) -> &mut Self {
        self.offset = Some(n);
        self
    }

    // ==================== Payloads ====================

    /// Queue one or more rows to insert, values bound.
    pub fn insert<I, R>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnValues>,
    {
        self.set_insert(rows, true)
    }

    /// Queue rows to insert with values inlined.
    pub fn insert_literal<I, R>(&mut self, rows: I) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnValues>,
    {
        self.set_insert(rows, false)
    }

    fn set_insert<I, R>(&mut self, rows: I, escaped: bool) -> &mut Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ColumnValues>,
    {
        self.payload = Payload::Insert {
            rows: rows.into_iter().map(Into::into).collect(),
            escaped,
        };
        self
    }

    /// SET list for an UPDATE, values bound.
    pub fn update(&mut self, values: impl Into<ColumnValues>) -> &mut Self {
        self.payload = Payload::Update {
            values: values.into(),
            escaped: true,
        };
        self
    }

    /// SET list for an UPDATE, values inlined.
    pub fn update_literal(&mut self, values: impl Into<ColumnValues>) -> &mut Self {
        self.payload = Payload::Update {
            values: values.into(),
            escaped: false,
        };
        self
    }

    /// Column whose generated value an INSERT reports as `insert_id`.
    pub fn set_incrementing_field(&mut self, field: impl Into<String>) -> &mut Self {
        self.incrementing_field = Some(field.into());
        self
    }

    /// `SELECT COUNT(*) num FROM (<this>) count_sql`.
    pub fn count_query(&self) -> QueryState {
        let mut count = QueryState::new();
        count
            .from_subquery(self, COUNT_ALIAS)
            .columns([format!("COUNT(*) {COUNT_FIELD}")]);
        count
    }
}

/// Alias given to the wrapped query in a count.
pub const COUNT_ALIAS: &str = "count_sql";
/// Field a count query reports its total in.
pub const COUNT_FIELD: &str = "num";
