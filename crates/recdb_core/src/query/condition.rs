//! Predicates over record fields.

use crate::accessor::Accessor;
use crate::error::{CoreError, CoreResult};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A predicate evaluated against a record's accessor.
pub trait Condition: Send + Sync + fmt::Debug + fmt::Display {
    /// Whether the record satisfies the predicate.
    fn complies(&self, acc: &dyn Accessor) -> bool;

    /// Validates the predicate before use.
    fn check(&self) -> CoreResult<()>;
}

/// Comparison operator of a [`Where`] clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Field is present.
    Exists,
    /// Boolean equality.
    Is,
    /// Equality; numbers compare by value.
    Equals,
    /// Inequality; false if the field is missing.
    NotEquals,
    /// Greater than.
    GreaterThan,
    /// Greater than or equal.
    GreaterOrEqual,
    /// Less than.
    LessThan,
    /// Less than or equal.
    LessOrEqual,
    /// String equality.
    SameAs,
    /// Substring, or array membership.
    Contains,
    /// String prefix.
    StartsWith,
    /// String suffix.
    EndsWith,
    /// Field equals one of the listed values.
    In,
}

impl Operator {
    /// Parses an operator token.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "exists" => Self::Exists,
            "is" => Self::Is,
            "==" | "=" => Self::Equals,
            "!=" => Self::NotEquals,
            ">" => Self::GreaterThan,
            ">=" => Self::GreaterOrEqual,
            "<" => Self::LessThan,
            "<=" => Self::LessOrEqual,
            "sameas" => Self::SameAs,
            "contains" => Self::Contains,
            "startswith" => Self::StartsWith,
            "endswith" => Self::EndsWith,
            "in" => Self::In,
            _ => return None,
        })
    }

    /// Canonical token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::Is => "is",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::GreaterThan => ">",
            Self::GreaterOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessOrEqual => "<=",
            Self::SameAs => "sameas",
            Self::Contains => "contains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::In => "in",
        }
    }

    /// Whether the operator takes a value.
    #[must_use]
    pub const fn takes_value(self) -> bool {
        !matches!(self, Self::Exists)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `key operator value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    key: String,
    operator: Operator,
    value: Value,
}

impl Where {
    /// Creates a clause.
    #[must_use]
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    /// Creates an `exists` clause.
    #[must_use]
    pub fn exists(key: impl Into<String>) -> Self {
        Self::new(key, Operator::Exists, Value::Null)
    }

    /// Field path.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Operator.
    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) if a.is_number() && b.is_number() => x == y,
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl Condition for Where {
    fn complies(&self, acc: &dyn Accessor) -> bool {
        let Some(field) = acc.get(&self.key) else {
            return false;
        };
        match self.operator {
            Operator::Exists => true,
            Operator::Is => field.as_bool().is_some() && field == self.value,
            Operator::Equals => loose_eq(&field, &self.value),
            Operator::NotEquals => !loose_eq(&field, &self.value),
            Operator::GreaterThan => ordering(&field, &self.value) == Some(Ordering::Greater),
            Operator::GreaterOrEqual => matches!(
                ordering(&field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::LessThan => ordering(&field, &self.value) == Some(Ordering::Less),
            Operator::LessOrEqual => matches!(
                ordering(&field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::SameAs => field.as_str().is_some() && field == self.value,
            Operator::Contains => match (&field, &self.value) {
                (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| loose_eq(item, needle)),
                _ => false,
            },
            Operator::StartsWith => match (field.as_str(), self.value.as_str()) {
                (Some(s), Some(prefix)) => s.starts_with(prefix),
                _ => false,
            },
            Operator::EndsWith => match (field.as_str(), self.value.as_str()) {
                (Some(s), Some(suffix)) => s.ends_with(suffix),
                _ => false,
            },
            Operator::In => match &self.value {
                Value::Array(options) => options.iter().any(|option| loose_eq(&field, option)),
                _ => false,
            },
        }
    }

    fn check(&self) -> CoreResult<()> {
        if self.key.is_empty() {
            return Err(CoreError::invalid_query("condition without a field"));
        }
        let ok = match self.operator {
            Operator::Exists | Operator::Equals | Operator::NotEquals | Operator::Contains => true,
            Operator::Is => self.value.is_boolean(),
            Operator::GreaterThan
            | Operator::GreaterOrEqual
            | Operator::LessThan
            | Operator::LessOrEqual => self.value.is_number() || self.value.is_string(),
            Operator::SameAs | Operator::StartsWith | Operator::EndsWith => self.value.is_string(),
            Operator::In => self.value.is_array(),
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::invalid_query(format!(
                "operator {} cannot compare against {}",
                self.operator, self.value
            )))
        }
    }
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operator.takes_value() {
            write!(f, "{} {} {}", self.key, self.operator, self.value)
        } else {
            write!(f, "{} {}", self.key, self.operator)
        }
    }
}

/// All conditions hold.
#[derive(Debug)]
pub struct And(pub Vec<Box<dyn Condition>>);

/// At least one condition holds.
#[derive(Debug)]
pub struct Or(pub Vec<Box<dyn Condition>>);

/// The condition does not hold.
#[derive(Debug)]
pub struct Not(pub Box<dyn Condition>);

impl Condition for And {
    fn complies(&self, acc: &dyn Accessor) -> bool {
        self.0.iter().all(|c| c.complies(acc))
    }

    fn check(&self) -> CoreResult<()> {
        if self.0.is_empty() {
            return Err(CoreError::invalid_query("empty and"));
        }
        self.0.iter().try_for_each(|c| c.check())
    }
}

impl Condition for Or {
    fn complies(&self, acc: &dyn Accessor) -> bool {
        self.0.iter().any(|c| c.complies(acc))
    }

    fn check(&self) -> CoreResult<()> {
        if self.0.is_empty() {
            return Err(CoreError::invalid_query("empty or"));
        }
        self.0.iter().try_for_each(|c| c.check())
    }
}

impl Condition for Not {
    fn complies(&self, acc: &dyn Accessor) -> bool {
        !self.0.complies(acc)
    }

    fn check(&self) -> CoreResult<()> {
        self.0.check()
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[Box<dyn Condition>], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    Ok(())
}

impl fmt::Display for And {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        join(f, &self.0, " and ")
    }
}

impl fmt::Display for Or {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        join(f, &self.0, " or ")?;
        f.write_str(")")
    }
}

impl fmt::Display for Not {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not ({})", self.0)
    }
}
