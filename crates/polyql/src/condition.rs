//! Condition sequences: ordered predicate/logic/bracket nodes.
//!
//! A [`ConditionSequence`] is rendered into WHERE, ON and HAVING fragments.
//! Node order is clause order. [`Logic`] nodes switch the keyword used to join
//! every *following* predicate; they attach to nothing themselves.
//!
//! ```ignore
//! use polyql::dialect::MySql;
//! use polyql::{Comparator, ConditionSequence, ParamCounter};
//!
//! let mut seq = ConditionSequence::new();
//! seq.where_("a", Comparator::Eq, 1).or().open_bracket()
//!     .where_("b", Comparator::Gt, 2)
//!     .where_("c", Comparator::Lt, 3)
//!     .close_bracket();
//! let (fragment, _) = seq.render(ParamCounter::unlabeled(), &MySql::new())?;
//! assert_eq!(fragment.sql, "a = ? OR ( b > ? OR c < ? )");
//! ```

use crate::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::generate::Generator;
use crate::param::{Binder, Fragment, ParamCounter};
use crate::state::QueryState;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `ILIKE` (Postgres)
    ILike,
}

impl Comparator {
    pub fn as_str(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "<>",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Like => "LIKE",
            Comparator::NotLike => "NOT LIKE",
            Comparator::ILike => "ILIKE",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "=" | "==" => Comparator::Eq,
            "<>" | "!=" => Comparator::Ne,
            ">" => Comparator::Gt,
            ">=" => Comparator::Gte,
            "<" => Comparator::Lt,
            "<=" => Comparator::Lte,
            "LIKE" => Comparator::Like,
            "NOT LIKE" => Comparator::NotLike,
            "ILIKE" => Comparator::ILike,
            other => return Err(DbError::invalid(format!("unknown comparator: {other}"))),
        };
        Ok(op)
    }
}

/// Logic keyword joining predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl Logic {
    pub fn keyword(self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Open,
    Close,
}

/// Right-hand side of an `IN` / `NOT IN` test.
#[derive(Debug, Clone, PartialEq)]
pub enum Membership {
    /// Literal list; `escaped` binds each element, otherwise they are inlined.
    Values { values: Vec<Value>, escaped: bool },
    /// A nested SELECT, rendered inline with the parent's counter.
    SubQuery(Box<QueryState>),
}

impl Membership {
    /// Bound list.
    pub fn values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Membership::Values {
            values: values.into_iter().map(Into::into).collect(),
            escaped: true,
        }
    }

    /// Inlined list.
    pub fn literals<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Membership::Values {
            values: values.into_iter().map(Into::into).collect(),
            escaped: false,
        }
    }

    pub fn subquery(state: &QueryState) -> Self {
        Membership::SubQuery(Box::new(state.clone()))
    }
}

impl<V: Into<Value>> From<Vec<V>> for Membership {
    fn from(values: Vec<V>) -> Self {
        Membership::values(values)
    }
}

impl From<&QueryState> for Membership {
    fn from(state: &QueryState) -> Self {
        Membership::subquery(state)
    }
}

/// What a predicate tests its field against.
#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    Compare {
        comparator: Comparator,
        value: Value,
        escaped: bool,
    },
    Null {
        negate: bool,
    },
    Membership {
        source: Membership,
        negate: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub test: Test,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Predicate(Predicate),
    Logic(Logic),
    Bracket(Bracket),
}

/// Ordered list of condition nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSequence {
    nodes: Vec<ConditionNode>,
}

impl ConditionSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[ConditionNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, node: ConditionNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Append every node of `other`.
    pub fn extend_from(&mut self, other: &ConditionSequence) -> &mut Self {
        self.nodes.extend(other.nodes.iter().cloned());
        self
    }

    /// `field comparator value`, bound when `escaped`, inlined otherwise.
    pub fn predicate(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        escaped: bool,
    ) -> &mut Self {
        self.push(ConditionNode::Predicate(Predicate {
            field: field.into(),
            test: Test::Compare {
                comparator,
                value: value.into(),
                escaped,
            },
        }))
    }

    /// Bound comparison.
    pub fn where_(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.predicate(field, comparator, value, true)
    }

    /// Inlined comparison, the default for join conditions (`a.id = b.a_id`).
    pub fn on(
        &mut self,
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.predicate(field, comparator, value, false)
    }

    pub fn is_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.null_test(field, false)
    }

    pub fn is_not_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.null_test(field, true)
    }

    fn null_test(&mut self, field: impl Into<String>, negate: bool) -> &mut Self {
        self.push(ConditionNode::Predicate(Predicate {
            field: field.into(),
            test: Test::Null { negate },
        }))
    }

    /// `field [NOT] IN (...)`.
    pub fn membership(
        &mut self,
        field: impl Into<String>,
        source: impl Into<Membership>,
        negate: bool,
    ) -> &mut Self {
        self.push(ConditionNode::Predicate(Predicate {
            field: field.into(),
            test: Test::Membership {
                source: source.into(),
                negate,
            },
        }))
    }

    pub fn in_(&mut self, field: impl Into<String>, source: impl Into<Membership>) -> &mut Self {
        self.membership(field, source, false)
    }

    pub fn not_in(&mut self, field: impl Into<String>, source: impl Into<Membership>) -> &mut Self {
        self.membership(field, source, true)
    }

    /// Join following predicates with `OR`.
    pub fn or(&mut self) -> &mut Self {
        self.push(ConditionNode::Logic(Logic::Or))
    }

    /// Join following predicates with `AND`.
    pub fn and(&mut self) -> &mut Self {
        self.push(ConditionNode::Logic(Logic::And))
    }

    pub fn open_bracket(&mut self) -> &mut Self {
        self.push(ConditionNode::Bracket(Bracket::Open))
    }

    pub fn close_bracket(&mut self) -> &mut Self {
        self.push(ConditionNode::Bracket(Bracket::Close))
    }

    /// Render into SQL text plus bound values, starting from `counter`.
    ///
    /// Returns the advanced counter for the caller to continue with.
    pub fn render(
        &self,
        counter: ParamCounter,
        dialect: &dyn Dialect,
    ) -> DbResult<(Fragment, ParamCounter)> {
        let mut binder = Binder::new(counter);
        self.render_into(dialect, &mut binder)?;
        Ok(binder.finish())
    }

    pub(crate) fn render_into(&self, dialect: &dyn Dialect, out: &mut Binder) -> DbResult<()> {
        let mut logic = Logic::And;
        // A keyword is due only after a predicate or a closing bracket.
        let mut joinable = false;
        let mut first_token = true;

        for node in &self.nodes {
            match node {
                ConditionNode::Logic(next) => logic = *next,
                ConditionNode::Bracket(Bracket::Open) => {
                    separate(out, &mut first_token);
                    if joinable {
                        out.push(logic.keyword());
                        out.push_char(' ');
                    }
                    out.push_char('(');
                    joinable = false;
                }
                ConditionNode::Bracket(Bracket::Close) => {
                    separate(out, &mut first_token);
                    out.push_char(')');
                    joinable = true;
                }
                ConditionNode::Predicate(predicate) => {
                    separate(out, &mut first_token);
                    if joinable {
                        out.push(logic.keyword());
                        out.push_char(' ');
                    }
                    render_predicate(predicate, dialect, out)?;
                    joinable = true;
                }
            }
        }
        Ok(())
    }
}

fn separate(out: &mut Binder, first_token: &mut bool) {
    if !*first_token {
        out.push_char(' ');
    }
    *first_token = false;
}

fn render_predicate(predicate: &Predicate, dialect: &dyn Dialect, out: &mut Binder) -> DbResult<()> {
    let field = dialect.escape_identifier(&predicate.field);
    match &predicate.test {
        Test::Compare {
            comparator,
            value,
            escaped,
        } => {
            out.push(&field);
            out.push_char(' ');
            out.push(comparator.as_str());
            out.push_char(' ');
            out.value(value, *escaped);
        }
        Test::Null { negate } => {
            out.push(&field);
            out.push(if *negate { " IS NOT NULL" } else { " IS NULL" });
        }
        Test::Membership { source, negate } => match source {
            Membership::Values { values, .. } if values.is_empty() => {
                // IN () is not valid SQL.
                out.push(if *negate { "1=1" } else { "1=0" });
            }
            Membership::Values { values, escaped } => {
                out.push(&field);
                out.push(if *negate { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push(", ");
                    }
                    out.value(value, *escaped);
                }
                out.push_char(')');
            }
            Membership::SubQuery(state) => {
                out.push(&field);
                out.push(if *negate { " NOT IN (" } else { " IN (" });
                let (fragment, counter) =
                    Generator::new(dialect).select_with(state, out.counter())?;
                out.absorb(fragment, counter);
                out.push_char(')');
            }
        },
    }
    Ok(())
}
