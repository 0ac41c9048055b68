//! Comparison conditions used as optimistic-concurrency predicates.
//!
//! The session layer never inspects a condition: it builds them once per
//! tracked instance through a [`PredicateFactory`], stores them, and hands
//! them back to whoever issues the UPDATE. The only contract is rendering
//! into a WHERE fragment with positional parameters.

use crate::field::FieldInfo;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// An opaque, immutable comparison condition.
pub trait Condition: fmt::Debug + fmt::Display + Send + Sync {
    /// Column the condition constrains.
    fn column(&self) -> &str;

    /// Value the column is compared against.
    fn value(&self) -> &Value;

    /// Render as a WHERE fragment, appending parameters to `params`.
    ///
    /// Placeholders are positional (`$1`, `$2`, ...) and numbered after the
    /// parameters already present.
    fn to_sql(&self, params: &mut Vec<Value>) -> String;
}

/// `"column" = value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnEquals {
    column: &'static str,
    value: Value,
}

impl ColumnEquals {
    /// Create an equality condition on `column`.
    pub fn new(column: &'static str, value: Value) -> Self {
        Self { column, value }
    }
}

impl Condition for ColumnEquals {
    fn column(&self) -> &str {
        self.column
    }

    fn value(&self) -> &Value {
        &self.value
    }

    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        params.push(self.value.clone());
        format!("{} = ${}", quote_ident(self.column), params.len())
    }
}

impl fmt::Display for ColumnEquals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column, self.value)
    }
}

/// Builds equality predicates for identifier and version fields.
pub trait PredicateFactory: Send + Sync {
    /// Build `field = value`.
    fn equality(&self, field: &'static FieldInfo, value: Value) -> Arc<dyn Condition>;
}

/// Default factory producing [`ColumnEquals`] conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualityPredicates;

impl PredicateFactory for EqualityPredicates {
    fn equality(&self, field: &'static FieldInfo, value: Value) -> Arc<dyn Condition> {
        Arc::new(ColumnEquals::new(field.column_name, value))
    }
}

impl<F> PredicateFactory for F
where
    F: Fn(&'static FieldInfo, Value) -> Arc<dyn Condition> + Send + Sync,
{
    fn equality(&self, field: &'static FieldInfo, value: Value) -> Arc<dyn Condition> {
        self(field, value)
    }
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them.
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a list of conditions joined with `AND`.
pub fn conjunction(conditions: &[Arc<dyn Condition>], params: &mut Vec<Value>) -> String {
    conditions
        .iter()
        .map(|c| c.to_sql(params))
        .collect::<Vec<_>>()
        .join(" AND ")
}
