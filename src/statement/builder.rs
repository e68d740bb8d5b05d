use super::{ColumnOp, Statement};
use crate::cas::{CasMode, CasOperation};
use crate::config::InsertStrategy;
use crate::core::{MapperError, Result, Value};
use crate::meta::{Entity, EntityMeta, Id, PrimaryKeyValue, PropertyDescriptor};
use crate::wrapper::CollectionOp;

/// Statements produced by an insert. Counters live outside the row and are
/// written as separate increments.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub statement: Statement,
    pub counters: Vec<Statement>,
}

/// Reads the primary key out of a raw entity.
pub fn key_of<T: Entity>(meta: &EntityMeta, entity: &T) -> Result<PrimaryKeyValue> {
    let values = meta
        .primary_key()
        .components()
        .iter()
        .map(|component| entity.get_raw(component.name()))
        .collect::<Result<Vec<_>>>()?;
    meta.bind_key(Id(values))
}

pub fn insert<T: Entity>(
    meta: &EntityMeta,
    entity: &T,
    key: &PrimaryKeyValue,
    strategy: InsertStrategy,
) -> Result<InsertPlan> {
    let mut columns = Vec::new();
    let mut counters = Vec::new();

    for property in meta.properties() {
        let value = entity.get_raw(property.name())?;

        if property.kind().is_counter() {
            match value {
                Value::Null | Value::Integer(0) => {}
                Value::Integer(delta) => counters.push(Statement::CounterIncrement {
                    table: meta.table().to_string(),
                    key: key.clone(),
                    column: property.column().to_string(),
                    delta,
                }),
                other => {
                    return Err(MapperError::TypeMismatch(format!(
                        "counter '{}' holds {}",
                        property.name(),
                        other.type_name()
                    )));
                }
            }
            continue;
        }

        if value.is_null_or_empty() {
            if strategy == InsertStrategy::AllFields {
                columns.push((property.column().to_string(), Value::Null));
            }
            continue;
        }
        columns.push((property.column().to_string(), value));
    }

    Ok(InsertPlan {
        statement: Statement::Insert {
            table: meta.table().to_string(),
            key: key.clone(),
            columns,
        },
        counters,
    })
}

/// Update statement for the dirty properties, in declaration order.
///
/// Returns `None` when nothing changed.
pub fn update<T: Entity>(
    meta: &EntityMeta,
    key: &PrimaryKeyValue,
    target: &T,
    dirty: &[&PropertyDescriptor],
    slots: &[Vec<CollectionOp>],
) -> Result<Option<Statement>> {
    let mut ops = Vec::new();

    for property in dirty {
        if property.kind().is_collection() {
            let pending = slots.get(property.index()).map(Vec::as_slice).unwrap_or(&[]);
            ops.extend(
                pending
                    .iter()
                    .filter_map(|op| op.to_column_op(property.column())),
            );
            continue;
        }

        let value = target.get_raw(property.name())?;
        if value.is_null() {
            ops.push(ColumnOp::Delete(property.column().to_string()));
        } else {
            ops.push(ColumnOp::Set(property.column().to_string(), value));
        }
    }

    if ops.is_empty() {
        return Ok(None);
    }
    Ok(Some(Statement::Update {
        table: meta.table().to_string(),
        key: key.clone(),
        ops,
    }))
}

pub fn delete(meta: &EntityMeta, key: &PrimaryKeyValue) -> Statement {
    Statement::Delete {
        table: meta.table().to_string(),
        key: key.clone(),
    }
}

/// Inserts accept only `IF NOT EXISTS`; updates and deletes accept
/// `IF EXISTS` or column conditions.
pub fn check_condition(operation: CasOperation, condition: Option<&CasMode>) -> Result<()> {
    let allowed = match (operation, condition) {
        (_, None) => true,
        (CasOperation::Insert, Some(CasMode::IfNotExists)) => true,
        (CasOperation::Insert, Some(_)) => false,
        (_, Some(CasMode::IfNotExists)) => false,
        (_, Some(CasMode::Conditions(conditions))) => !conditions.is_empty(),
        (_, Some(CasMode::IfExists)) => true,
    };
    if allowed {
        Ok(())
    } else {
        Err(MapperError::UnsupportedOperation(format!(
            "{:?} is not a valid condition for {}",
            condition, operation
        )))
    }
}
