use crate::core::Value;
use crate::statement::ColumnOp;
use std::collections::{BTreeMap, BTreeSet};

/// A structural change recorded by a collection wrapper or a whole-value
/// assignment, replayed against the store at flush time.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOp {
    /// Full overwrite; null or empty clears the column.
    Assign(Value),
    Clear,
    Append(Vec<Value>),
    Prepend(Vec<Value>),
    SetAt { index: usize, value: Value },
    RemoveAt(usize),
    RemoveValues(Vec<Value>),
    AddElements(BTreeSet<Value>),
    RemoveElements(BTreeSet<Value>),
    PutEntries(BTreeMap<Value, Value>),
    RemoveKeys(BTreeSet<Value>),
}

impl CollectionOp {
    /// Column mutation for this op; `None` when the op carries no change.
    pub fn to_column_op(&self, column: &str) -> Option<ColumnOp> {
        let column = column.to_string();
        match self {
            CollectionOp::Assign(value) if value.is_null_or_empty() => {
                Some(ColumnOp::Delete(column))
            }
            CollectionOp::Assign(value) => Some(ColumnOp::Set(column, value.clone())),
            CollectionOp::Clear => Some(ColumnOp::Delete(column)),
            CollectionOp::Append(values) if values.is_empty() => None,
            CollectionOp::Append(values) => Some(ColumnOp::ListAppend(column, values.clone())),
            CollectionOp::Prepend(values) if values.is_empty() => None,
            CollectionOp::Prepend(values) => Some(ColumnOp::ListPrepend(column, values.clone())),
            CollectionOp::SetAt { index, value } => {
                Some(ColumnOp::ListSetAt(column, *index, value.clone()))
            }
            CollectionOp::RemoveAt(index) => Some(ColumnOp::ListRemoveAt(column, *index)),
            CollectionOp::RemoveValues(values) if values.is_empty() => None,
            CollectionOp::RemoveValues(values) => {
                Some(ColumnOp::ListRemove(column, values.clone()))
            }
            CollectionOp::AddElements(values) if values.is_empty() => None,
            CollectionOp::AddElements(values) => Some(ColumnOp::SetAdd(column, values.clone())),
            CollectionOp::RemoveElements(values) if values.is_empty() => None,
            CollectionOp::RemoveElements(values) => {
                Some(ColumnOp::SetRemove(column, values.clone()))
            }
            CollectionOp::PutEntries(entries) if entries.is_empty() => None,
            CollectionOp::PutEntries(entries) => Some(ColumnOp::MapPut(column, entries.clone())),
            CollectionOp::RemoveKeys(keys) if keys.is_empty() => None,
            CollectionOp::RemoveKeys(keys) => Some(ColumnOp::MapRemove(column, keys.clone())),
        }
    }
}
