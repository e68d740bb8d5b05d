// ============================================================================
// Collection Wrappers
// ============================================================================
//
// The store cannot diff collections, so list/set/map properties are mutated
// through wrappers that apply the change to the raw field and record the
// matching structural op in the proxy's slot for that property.
//
// Only the wrappers' own methods record anything. Views handed out by a
// wrapper (sub-lists, cursors, key/value/entry sets) change the in-memory
// collection and nothing else: those edits never reach the store.
//
// ============================================================================

pub mod list;
pub mod map;
pub mod op;
pub mod set;
pub mod views;

pub use list::ListWrapper;
pub use map::MapWrapper;
pub use op::CollectionOp;
pub use set::SetWrapper;
pub use views::{EntrySetView, KeySetView, ListCursor, SetCursor, SubListView, ValuesView};

use crate::core::{MapperError, Result, Value};
use crate::meta::Entity;
use crate::proxy::ProxyState;
use std::collections::{BTreeMap, BTreeSet};

fn mismatch<T: Entity>(state: &ProxyState<T>, index: usize, expected: &str, got: &Value) -> MapperError {
    MapperError::TypeMismatch(format!(
        "property '{}' holds {}, not a {}",
        state.meta().property_at(index).name(),
        got.type_name(),
        expected
    ))
}

pub(crate) fn read_list<T: Entity>(state: &ProxyState<T>, index: usize) -> Result<Vec<Value>> {
    match state.raw(index)? {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items),
        other => Err(mismatch(state, index, "list", &other)),
    }
}

pub(crate) fn read_set<T: Entity>(state: &ProxyState<T>, index: usize) -> Result<BTreeSet<Value>> {
    match state.raw(index)? {
        Value::Null => Ok(BTreeSet::new()),
        Value::Set(items) => Ok(items),
        other => Err(mismatch(state, index, "set", &other)),
    }
}

pub(crate) fn read_map<T: Entity>(
    state: &ProxyState<T>,
    index: usize,
) -> Result<BTreeMap<Value, Value>> {
    match state.raw(index)? {
        Value::Null => Ok(BTreeMap::new()),
        Value::Map(entries) => Ok(entries),
        other => Err(mismatch(state, index, "map", &other)),
    }
}

fn out_of_bounds(index: usize, len: usize) -> MapperError {
    MapperError::IndexOutOfBounds { index, len }
}
