use super::{COMMON_RESERVED, Dialect, DialectKind, ReservedWords};
use crate::param::ParamCounter;

/// PostgreSQL: `$1, $2, ...` placeholders, double-quote quoting, `RETURNING`.
#[derive(Debug, Clone)]
pub struct Postgres {
    reserved: ReservedWords,
}

impl Default for Postgres {
    fn default() -> Self {
        let mut reserved = ReservedWords::new(COMMON_RESERVED);
        for w in ["user", "group", "limit", "offset"] {
            reserved.insert(w);
        }
        Self { reserved }
    }
}

impl Postgres {
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

impl Dialect for Postgres {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn param_counter(&self) -> ParamCounter {
        ParamCounter::labeled("$", "", 1)
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn is_reserved(&self, word: &str) -> bool {
        self.reserved.contains(word)
    }

    fn conditional(&self, test: &str, then: &str, otherwise: &str) -> String {
        format!("CASE WHEN {test} THEN {then} ELSE {otherwise} END")
    }

    fn supports_returning(&self) -> bool {
        true
    }
}
