// ============================================================================
// Write Statements
// ============================================================================
//
// Store-neutral representation of the writes the mapper issues. Collection
// columns are never diffed: list/set/map changes travel as the structural
// deltas recorded by the collection wrappers.
//
// ============================================================================

pub mod builder;

use crate::cas::{CasMode, CasOperation};
use crate::core::Value;
use crate::meta::PrimaryKeyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One column mutation inside an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnOp {
    Set(String, Value),
    Delete(String),
    ListAppend(String, Vec<Value>),
    ListPrepend(String, Vec<Value>),
    ListSetAt(String, usize, Value),
    ListRemoveAt(String, usize),
    /// Removes every occurrence of each value.
    ListRemove(String, Vec<Value>),
    SetAdd(String, BTreeSet<Value>),
    SetRemove(String, BTreeSet<Value>),
    MapPut(String, BTreeMap<Value, Value>),
    MapRemove(String, BTreeSet<Value>),
}

impl ColumnOp {
    pub fn column(&self) -> &str {
        match self {
            ColumnOp::Set(column, _)
            | ColumnOp::Delete(column)
            | ColumnOp::ListAppend(column, _)
            | ColumnOp::ListPrepend(column, _)
            | ColumnOp::ListSetAt(column, _, _)
            | ColumnOp::ListRemoveAt(column, _)
            | ColumnOp::ListRemove(column, _)
            | ColumnOp::SetAdd(column, _)
            | ColumnOp::SetRemove(column, _)
            | ColumnOp::MapPut(column, _)
            | ColumnOp::MapRemove(column, _) => column,
        }
    }
}

impl fmt::Display for ColumnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnOp::Set(c, v) => write!(f, "{}={}", c, v),
            ColumnOp::Delete(c) => write!(f, "{}=null", c),
            ColumnOp::ListAppend(c, v) => write!(f, "{}={}+{}", c, c, Value::List(v.clone())),
            ColumnOp::ListPrepend(c, v) => write!(f, "{}={}+{}", c, Value::List(v.clone()), c),
            ColumnOp::ListSetAt(c, i, v) => write!(f, "{}[{}]={}", c, i, v),
            ColumnOp::ListRemoveAt(c, i) => write!(f, "{}[{}]=null", c, i),
            ColumnOp::ListRemove(c, v) => write!(f, "{}={}-{}", c, c, Value::List(v.clone())),
            ColumnOp::SetAdd(c, v) => write!(f, "{}={}+{}", c, c, Value::Set(v.clone())),
            ColumnOp::SetRemove(c, v) => write!(f, "{}={}-{}", c, c, Value::Set(v.clone())),
            ColumnOp::MapPut(c, v) => write!(f, "{}={}+{}", c, c, Value::Map(v.clone())),
            ColumnOp::MapRemove(c, v) => write!(f, "{}={}-{}", c, c, Value::Set(v.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Null values are written as explicit cell deletions.
    Insert {
        table: String,
        key: PrimaryKeyValue,
        columns: Vec<(String, Value)>,
    },
    Update {
        table: String,
        key: PrimaryKeyValue,
        ops: Vec<ColumnOp>,
    },
    Delete {
        table: String,
        key: PrimaryKeyValue,
    },
    CounterIncrement {
        table: String,
        key: PrimaryKeyValue,
        column: String,
        delta: i64,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::CounterIncrement { table, .. } => table,
        }
    }

    pub fn key(&self) -> &PrimaryKeyValue {
        match self {
            Statement::Insert { key, .. }
            | Statement::Update { key, .. }
            | Statement::Delete { key, .. }
            | Statement::CounterIncrement { key, .. } => key,
        }
    }

    /// Counter increments have no conditional form.
    pub fn cas_operation(&self) -> Option<CasOperation> {
        match self {
            Statement::Insert { .. } => Some(CasOperation::Insert),
            Statement::Update { .. } => Some(CasOperation::Update),
            Statement::Delete { .. } => Some(CasOperation::Delete),
            Statement::CounterIncrement { .. } => None,
        }
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, Statement::CounterIncrement { .. })
    }
}

/// A statement plus its write options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundStatement {
    pub statement: Statement,
    /// Seconds
    pub ttl: Option<u32>,
    /// Microseconds; the store assigns one when absent.
    pub timestamp: Option<i64>,
    pub condition: Option<CasMode>,
}

impl BoundStatement {
    pub fn new(statement: Statement) -> Self {
        Self {
            statement,
            ttl: None,
            timestamp: None,
            condition: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<i64>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_condition(mut self, condition: Option<CasMode>) -> Self {
        self.condition = condition;
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// CQL-like rendering for logs.
    pub fn describe(&self) -> String {
        let mut out = match &self.statement {
            Statement::Insert {
                table,
                key,
                columns,
            } => {
                let names = key
                    .components()
                    .iter()
                    .chain(columns.iter())
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                let values = key
                    .components()
                    .iter()
                    .chain(columns.iter())
                    .map(|(_, value)| value.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("INSERT INTO {}({}) VALUES ({})", table, names, values)
            }
            Statement::Update { table, key, ops } => {
                let assignments = ops
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("UPDATE {} SET {} WHERE {}", table, assignments, key)
            }
            Statement::Delete { table, key } => format!("DELETE FROM {} WHERE {}", table, key),
            Statement::CounterIncrement {
                table,
                key,
                column,
                delta,
            } => format!(
                "UPDATE {} SET {}={}+{} WHERE {}",
                table, column, column, delta, key
            ),
        };

        let mut using = Vec::new();
        if let Some(ttl) = self.ttl {
            using.push(format!("TTL {}", ttl));
        }
        if let Some(timestamp) = self.timestamp {
            using.push(format!("TIMESTAMP {}", timestamp));
        }
        if !using.is_empty() {
            out.push_str(" USING ");
            out.push_str(&using.join(" AND "));
        }

        match &self.condition {
            Some(CasMode::IfNotExists) => out.push_str(" IF NOT EXISTS"),
            Some(CasMode::IfExists) => out.push_str(" IF EXISTS"),
            Some(CasMode::Conditions(conditions)) => {
                let rendered = conditions
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" AND ");
                out.push_str(" IF ");
                out.push_str(&rendered);
            }
            None => {}
        }
        out
    }
}
