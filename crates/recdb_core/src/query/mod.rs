//! Queries: a key prefix within one database plus an optional condition.

mod condition;
mod parser;

pub use condition::{And, Condition, Not, Operator, Or, Where};

use crate::error::{CoreError, CoreResult};
use crate::record::{parse_key, Record};
use std::fmt;
use std::sync::Arc;

/// Selects records of one database by key prefix and condition.
///
/// ```
/// use recdb_core::query::{Operator, Query, Where};
///
/// let q = Query::new("core:people/").with_condition(Where::new("age", Operator::GreaterThan, 30));
/// assert_eq!(q.database_name(), "core");
/// assert_eq!(q.database_key_prefix(), "people/");
/// assert_eq!(q.to_string(), "query core:people/ where age > 30");
/// ```
#[derive(Debug, Clone)]
pub struct Query {
    db_name: String,
    db_key_prefix: String,
    condition: Option<Arc<dyn Condition>>,
}

impl Query {
    /// Creates a query from a `name:prefix` string.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let (name, key_prefix) = parse_key(prefix);
        Self {
            db_name: name.to_owned(),
            db_key_prefix: key_prefix.to_owned(),
            condition: None,
        }
    }

    /// Parses query text, see [`parser`](self) for the grammar.
    pub fn parse(text: &str) -> CoreResult<Self> {
        parser::parse(text)
    }

    /// Sets the condition, replacing any previous one.
    #[must_use]
    pub fn with_condition(self, condition: impl Condition + 'static) -> Self {
        self.with_boxed_condition(Box::new(condition))
    }

    /// Sets an already boxed condition.
    #[must_use]
    pub fn with_boxed_condition(mut self, condition: Box<dyn Condition>) -> Self {
        self.condition = Some(Arc::from(condition));
        self
    }

    /// Validates the query.
    pub fn check(&self) -> CoreResult<()> {
        if self.db_name.is_empty() {
            return Err(CoreError::invalid_query("missing database name"));
        }
        match &self.condition {
            Some(condition) => condition.check(),
            None => Ok(()),
        }
    }

    /// Database the query runs against.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.db_name
    }

    /// Key prefix within the database.
    #[must_use]
    pub fn database_key_prefix(&self) -> &str {
        &self.db_key_prefix
    }

    /// The condition, if any.
    #[must_use]
    pub fn condition(&self) -> Option<&dyn Condition> {
        self.condition.as_deref()
    }

    /// Whether a database key falls under the prefix.
    #[must_use]
    pub fn matches_key(&self, db_key: &str) -> bool {
        db_key.starts_with(&self.db_key_prefix)
    }

    /// Whether the record satisfies the condition. Records without an
    /// accessor only match queries without a condition.
    pub fn matches_record(&self, record: &mut dyn Record) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        match record.accessor() {
            Some(acc) => condition.complies(acc.as_ref()),
            None => false,
        }
    }

    /// Whether the record lives in this database, under the prefix, and
    /// satisfies the condition.
    pub fn matches(&self, record: &mut dyn Record) -> bool {
        let base = record.base();
        base.database_name() == self.db_name
            && self.matches_key(base.database_key())
            && self.matches_record(record)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query {}:{}", self.db_name, self.db_key_prefix)?;
        if let Some(condition) = &self.condition {
            write!(f, " where {condition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{TypedRecord, Wrapper};
    use recdb_codec::Format;
    use serde_json::json;

    fn wrapper(key: &str, json: &str) -> Wrapper {
        Wrapper::new(key, None, Format::Json, json.as_bytes().to_vec())
    }

    #[test]
    fn check_requires_database() {
        assert!(Query::new(":x").check().is_err());
        assert!(Query::new("core:").check().is_ok());
        let bad = Query::new("core:").with_condition(Where::new("a", Operator::Is, 1));
        assert!(bad.check().is_err());
    }

    #[test]
    fn matches_prefix_and_condition() {
        let q = Query::new("core:test/").with_condition(Where::new("x", Operator::Equals, 1));
        assert!(q.matches(&mut wrapper("core:test/a", r#"{"x":1}"#)));
        assert!(!q.matches(&mut wrapper("core:test/a", r#"{"x":2}"#)));
        assert!(!q.matches(&mut wrapper("core:other/a", r#"{"x":1}"#)));
        assert!(!q.matches(&mut wrapper("other:test/a", r#"{"x":1}"#)));
    }

    #[test]
    fn records_without_accessor() {
        let mut text = Wrapper::new("core:a", None, Format::String, b"hi".to_vec());
        assert!(Query::new("core:").matches(&mut text));
        assert!(!Query::new("core:")
            .with_condition(Where::exists("x"))
            .matches(&mut text));
    }

    #[test]
    fn typed_records_match_through_struct_accessor() {
        let q = Query::new("core:").with_condition(Where::new("n", Operator::GreaterOrEqual, 3));
        let mut record = TypedRecord::new("core:a", json!({"n": 3}));
        assert!(q.matches(&mut record));
    }

    #[test]
    fn parse_and_display() {
        let q = Query::parse("query core:test/ where x == 1").unwrap();
        assert_eq!(q.to_string(), "query core:test/ where x == 1");
        assert!(q.check().is_ok());
    }
}
