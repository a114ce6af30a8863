use super::{COMMON_RESERVED, Dialect, DialectKind, ReservedWords};
use crate::param::ParamCounter;

/// MySQL / MariaDB: `?` placeholders, backtick quoting.
#[derive(Debug, Clone)]
pub struct MySql {
    reserved: ReservedWords,
}

impl Default for MySql {
    fn default() -> Self {
        Self {
            reserved: ReservedWords::new(COMMON_RESERVED),
        }
    }
}

impl MySql {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quote additional words.
    pub fn with_reserved<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for w in words {
            self.reserved.insert(w.as_ref());
        }
        self
    }
}

impl Dialect for MySql {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn param_counter(&self) -> ParamCounter {
        ParamCounter::unlabeled()
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn is_reserved(&self, word: &str) -> bool {
        self.reserved.contains(word)
    }

    fn conditional(&self, test: &str, then: &str, otherwise: &str) -> String {
        format!("IF({test}, {then}, {otherwise})")
    }

    fn begin_statement(&self) -> &'static str {
        "START TRANSACTION"
    }
}
