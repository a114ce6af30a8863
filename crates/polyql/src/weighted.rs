//! Weighted scoring conditions.
//!
//! A [`WeightedCondition`] compiles to `test ? weight : otherwise`, where
//! `otherwise` is a plain number or another weighted condition. All weighted
//! conditions on a query are summed into one ranking column.

use crate::condition::{Comparator, ConditionSequence};
use crate::dialect::Dialect;
use crate::error::DbResult;
use crate::param::{Binder, Fragment, ParamCounter};
use crate::value::Value;

/// Alias of the synthetic ranking column.
pub const WEIGHT_COLUMN: &str = "__condition_weight__";

/// Score used when the test does not match.
#[derive(Debug, Clone, PartialEq)]
pub enum Otherwise {
    Weight(f64),
    Nested(Box<WeightedCondition>),
}

impl From<f64> for Otherwise {
    fn from(w: f64) -> Self {
        Otherwise::Weight(w)
    }
}

impl From<i32> for Otherwise {
    fn from(w: i32) -> Self {
        Otherwise::Weight(f64::from(w))
    }
}

impl From<WeightedCondition> for Otherwise {
    fn from(next: WeightedCondition) -> Self {
        Otherwise::Nested(Box::new(next))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedCondition {
    conditions: ConditionSequence,
    weight: f64,
    otherwise: Otherwise,
}

impl WeightedCondition {
    /// Score `weight` when `field comparator value` holds (value is bound).
    pub fn new(
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> Self {
        let mut conditions = ConditionSequence::new();
        conditions.where_(field, comparator, value);
        Self::from_conditions(conditions, weight, otherwise)
    }

    /// Like [`WeightedCondition::new`], with the value inlined into the SQL.
    pub fn literal(
        field: impl Into<String>,
        comparator: Comparator,
        value: impl Into<Value>,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> Self {
        let mut conditions = ConditionSequence::new();
        conditions.on(field, comparator, value);
        Self::from_conditions(conditions, weight, otherwise)
    }

    /// Score `weight` when the whole sequence holds.
    pub fn from_conditions(
        conditions: ConditionSequence,
        weight: f64,
        otherwise: impl Into<Otherwise>,
    ) -> Self {
        Self {
            conditions,
            weight,
            otherwise: otherwise.into(),
        }
    }

    pub fn conditions(&self) -> &ConditionSequence {
        &self.conditions
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn otherwise(&self) -> &Otherwise {
        &self.otherwise
    }

    /// Compile to a conditional expression, continuing from `counter`.
    pub fn compile(
        &self,
        dialect: &dyn Dialect,
        counter: ParamCounter,
    ) -> DbResult<(Fragment, ParamCounter)> {
        let mut test = Binder::new(counter);
        self.conditions.render_into(dialect, &mut test)?;
        let (test, counter) = test.finish();

        let (otherwise, counter) = match &self.otherwise {
            Otherwise::Weight(w) => (Fragment::new(format_weight(*w)), counter),
            Otherwise::Nested(next) => next.compile(dialect, counter)?,
        };

        let sql = dialect.conditional(&test.sql, &format_weight(self.weight), &otherwise.sql);
        let mut params = test.params;
        params.extend(otherwise.params);
        let mut param_names = test.param_names;
        param_names.extend(otherwise.param_names);

        Ok((
            Fragment {
                sql,
                params,
                param_names,
            },
            counter,
        ))
    }
}

fn format_weight(w: f64) -> String {
    format!("{w}")
}

/// Sum every weighted condition into one `expr + expr __condition_weight__` column.
pub(crate) fn render_weight_column(
    conditions: &[WeightedCondition],
    dialect: &dyn Dialect,
    out: &mut Binder,
) -> DbResult<()> {
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            out.push(" + ");
        }
        let (fragment, counter) = condition.compile(dialect, out.counter())?;
        out.absorb(fragment, counter);
    }
    out.push(" ");
    out.push(WEIGHT_COLUMN);
    Ok(())
}
