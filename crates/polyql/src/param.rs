//! Placeholder allocation and rendered fragments.
//!
//! A [`ParamCounter`] is passed *by value* into every render call and handed
//! back alongside the output. Nested pieces (subqueries, join conditions,
//! weighted conditions) receive the parent's counter, advance it, and return
//! it, so labeled placeholders stay aligned with the flattened parameter list.

use crate::value::Value;

/// How a dialect writes placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Every placeholder is the same token, e.g. `?`.
    Anonymous(String),
    /// `symbol + prefix + n`, e.g. `$1` or `@param0`.
    Labeled { symbol: String, prefix: String },
}

/// Cursor for placeholder numbering, owned by the outermost render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamCounter {
    style: PlaceholderStyle,
    next: usize,
}

/// One allocated placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub text: String,
    pub name: Option<String>,
}

impl ParamCounter {
    /// Anonymous `?` placeholders.
    pub fn unlabeled() -> Self {
        Self::anonymous("?")
    }

    /// Anonymous placeholders with a custom token.
    pub fn anonymous(token: impl Into<String>) -> Self {
        Self {
            style: PlaceholderStyle::Anonymous(token.into()),
            next: 0,
        }
    }

    /// Labeled placeholders `symbol + prefix + n`, starting at `start`.
    pub fn labeled(symbol: impl Into<String>, prefix: impl Into<String>, start: usize) -> Self {
        Self {
            style: PlaceholderStyle::Labeled {
                symbol: symbol.into(),
                prefix: prefix.into(),
            },
            next: start,
        }
    }

    pub fn style(&self) -> &PlaceholderStyle {
        &self.style
    }

    /// Whether placeholders embed their ordinal.
    pub fn is_labeled(&self) -> bool {
        matches!(self.style, PlaceholderStyle::Labeled { .. })
    }

    /// The number the next labeled placeholder will carry.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Allocate the next placeholder.
    pub fn allocate(&mut self) -> Placeholder {
        match &self.style {
            PlaceholderStyle::Anonymous(token) => Placeholder {
                text: token.clone(),
                name: None,
            },
            PlaceholderStyle::Labeled { symbol, prefix } => {
                let name = format!("{prefix}{}", self.next);
                self.next += 1;
                Placeholder {
                    text: format!("{symbol}{name}"),
                    name: Some(name),
                }
            }
        }
    }
}

/// Rendered SQL text with its bound values, in placeholder order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
    /// Labeled placeholder names (without the symbol); empty for anonymous styles.
    pub param_names: Vec<String>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Accumulates text and values while rendering one piece.
#[derive(Debug)]
pub(crate) struct Binder {
    counter: ParamCounter,
    sql: String,
    params: Vec<Value>,
    names: Vec<String>,
}

impl Binder {
    pub(crate) fn new(counter: ParamCounter) -> Self {
        Self {
            counter,
            sql: String::new(),
            params: Vec::new(),
            names: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    pub(crate) fn push_char(&mut self, ch: char) {
        self.sql.push(ch);
    }

    /// Bind one value: write its placeholder and record it.
    pub(crate) fn bind(&mut self, value: Value) {
        let placeholder = self.counter.allocate();
        self.sql.push_str(&placeholder.text);
        if let Some(name) = placeholder.name {
            self.names.push(name);
        }
        self.params.push(value);
    }

    /// Write a value either as a placeholder or inline.
    pub(crate) fn value(&mut self, value: &Value, escaped: bool) {
        if escaped {
            self.bind(value.clone());
        } else {
            value.write_literal(&mut self.sql);
        }
    }

    /// Hand the current counter to a nested render.
    pub(crate) fn counter(&self) -> ParamCounter {
        self.counter.clone()
    }

    /// Take back a nested render's output and its advanced counter.
    pub(crate) fn absorb(&mut self, fragment: Fragment, counter: ParamCounter) {
        self.sql.push_str(&fragment.sql);
        self.params.extend(fragment.params);
        self.names.extend(fragment.param_names);
        self.counter = counter;
    }

    pub(crate) fn finish(self) -> (Fragment, ParamCounter) {
        (
            Fragment {
                sql: self.sql,
                params: self.params,
                param_names: self.names,
            },
            self.counter,
        )
    }
}
