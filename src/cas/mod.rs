// ============================================================================
// Conditional Writes (compare-and-swap)
// ============================================================================
//
// A conditional write carries either an existence marker or a list of column
// conditions. The store answers with an applied flag plus, when rejected, the
// current row. Rejections are surfaced as a typed error unless a result
// listener was registered for the call, never both.
//
// ============================================================================

pub mod protocol;

pub use protocol::{CasResultListener, interpret_outcome};

use crate::core::{Row, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Comparison applied between the stored column value and the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CasOperator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl fmt::Display for CasOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CasOperator::Eq => "=",
            CasOperator::NotEq => "!=",
            CasOperator::Gt => ">",
            CasOperator::Gte => ">=",
            CasOperator::Lt => "<",
            CasOperator::Lte => "<=",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasCondition {
    column: String,
    operator: CasOperator,
    value: Value,
}

impl CasCondition {
    pub fn new(column: &str, operator: CasOperator, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::Eq, value)
    }

    pub fn not_eq(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::NotEq, value)
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::Gt, value)
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::Gte, value)
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::Lt, value)
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self::new(column, CasOperator::Lte, value)
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn operator(&self) -> CasOperator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// A missing column compares as null; ordering operators never match null.
    pub fn evaluate(&self, current: Option<&Value>) -> bool {
        let current = current.unwrap_or(&Value::Null);
        match self.operator {
            CasOperator::Eq => current == &self.value,
            CasOperator::NotEq => current != &self.value,
            _ if current.is_null() || self.value.is_null() => false,
            CasOperator::Gt => current.cmp(&self.value) == Ordering::Greater,
            CasOperator::Gte => current.cmp(&self.value) != Ordering::Less,
            CasOperator::Lt => current.cmp(&self.value) == Ordering::Less,
            CasOperator::Lte => current.cmp(&self.value) != Ordering::Greater,
        }
    }
}

impl fmt::Display for CasCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.column, self.operator, self.value)
    }
}

/// Guard attached to a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CasMode {
    IfNotExists,
    IfExists,
    Conditions(Vec<CasCondition>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CasOperation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for CasOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CasOperation::Insert => write!(f, "INSERT"),
            CasOperation::Update => write!(f, "UPDATE"),
            CasOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub struct CasResult {
    pub applied: bool,
    /// Only populated when `applied` is false.
    pub current_values: Row,
}

impl CasResult {
    pub fn applied() -> Self {
        Self {
            applied: true,
            current_values: Row::new(),
        }
    }

    pub fn rejected(current_values: Row) -> Self {
        Self {
            applied: false,
            current_values,
        }
    }
}

fn render_values(values: &Row) -> String {
    let body = values
        .iter()
        .map(|(column, value)| format!("{}={}", column, value))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}

/// A conditional write the store refused to apply.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("CAS operation {operation} cannot be applied. Current values are: {}", render_values(.current_values))]
pub struct CasError {
    pub operation: CasOperation,
    pub current_values: Row,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_sorts_columns() {
        let mut current = Row::new();
        current.insert("name".to_string(), Value::from("name"));
        current.insert("id".to_string(), Value::from(10));
        let err = CasError {
            operation: CasOperation::Insert,
            current_values: current,
        };
        assert_eq!(
            err.to_string(),
            "CAS operation INSERT cannot be applied. Current values are: {id=10, name=name}"
        );
    }

    #[test]
    fn test_condition_evaluation() {
        let age = Value::from(30);
        assert!(CasCondition::eq("age", 30).evaluate(Some(&age)));
        assert!(CasCondition::not_eq("age", 31).evaluate(Some(&age)));
        assert!(CasCondition::gt("age", 29).evaluate(Some(&age)));
        assert!(CasCondition::lte("age", 30).evaluate(Some(&age)));
        assert!(!CasCondition::lt("age", 30).evaluate(Some(&age)));

        assert!(CasCondition::eq("age", Value::Null).evaluate(None));
        assert!(!CasCondition::gt("age", 1).evaluate(None));
    }
}
