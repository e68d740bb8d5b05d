//! Views derived from collection wrappers.
//!
//! They edit the raw collection directly and record nothing: changes made
//! through a view are never flushed.

use super::{out_of_bounds, read_list, read_map, read_set};
use crate::core::{Result, Value};
use crate::meta::Entity;
use crate::proxy::ProxyState;
use std::collections::BTreeSet;

/// Window `[from, to)` over a list property.
pub struct SubListView<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
    from: usize,
    to: usize,
}

impl<'a, T: Entity> SubListView<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize, from: usize, to: usize) -> Self {
        Self {
            state,
            index,
            from,
            to,
        }
    }

    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        let items = read_list(&*self.state, self.index)?;
        Ok(items[self.from..self.to.min(items.len())].to_vec())
    }

    pub fn get(&self, index: usize) -> Result<Option<Value>> {
        Ok(self.to_vec()?.get(index).cloned())
    }

    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<Value> {
        if index >= self.len() {
            return Err(out_of_bounds(index, self.len()));
        }
        let mut items = read_list(&*self.state, self.index)?;
        let previous = std::mem::replace(&mut items[self.from + index], value.into());
        self.state.write_raw(self.index, Value::List(items))?;
        Ok(previous)
    }

    pub fn remove(&mut self, index: usize) -> Result<Value> {
        if index >= self.len() {
            return Err(out_of_bounds(index, self.len()));
        }
        let mut items = read_list(&*self.state, self.index)?;
        let removed = items.remove(self.from + index);
        self.state.write_raw(self.index, Value::List(items))?;
        self.to -= 1;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        let mut items = read_list(&*self.state, self.index)?;
        items.drain(self.from..self.to);
        self.state.write_raw(self.index, Value::List(items))?;
        self.to = self.from;
        Ok(())
    }
}

/// Forward cursor over a list property.
pub struct ListCursor<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
    position: usize,
    last: Option<usize>,
}

impl<'a, T: Entity> ListCursor<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self {
            state,
            index,
            position: 0,
            last: None,
        }
    }

    pub fn next(&mut self) -> Result<Option<Value>> {
        let items = read_list(&*self.state, self.index)?;
        let item = items.get(self.position).cloned();
        if item.is_some() {
            self.last = Some(self.position);
            self.position += 1;
        }
        Ok(item)
    }

    /// Removes the element last returned by `next`.
    pub fn remove(&mut self) -> Result<()> {
        let Some(last) = self.last.take() else {
            return Ok(());
        };
        let mut items = read_list(&*self.state, self.index)?;
        if last < items.len() {
            items.remove(last);
            self.position = last;
        }
        self.state.write_raw(self.index, Value::List(items))
    }

    /// Replaces the element last returned by `next`.
    pub fn set(&mut self, value: impl Into<Value>) -> Result<()> {
        let Some(last) = self.last else {
            return Ok(());
        };
        let mut items = read_list(&*self.state, self.index)?;
        if let Some(slot) = items.get_mut(last) {
            *slot = value.into();
        }
        self.state.write_raw(self.index, Value::List(items))
    }
}

/// Ascending cursor over a set property.
pub struct SetCursor<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
    last: Option<Value>,
}

impl<'a, T: Entity> SetCursor<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self {
            state,
            index,
            last: None,
        }
    }

    pub fn next(&mut self) -> Result<Option<Value>> {
        let items = read_set(&*self.state, self.index)?;
        let item = match &self.last {
            Some(last) => items
                .range((std::ops::Bound::Excluded(last), std::ops::Bound::Unbounded))
                .next()
                .cloned(),
            None => items.iter().next().cloned(),
        };
        if let Some(item) = &item {
            self.last = Some(item.clone());
        }
        Ok(item)
    }

    /// Removes the element last returned by `next`.
    pub fn remove(&mut self) -> Result<()> {
        let Some(last) = &self.last else {
            return Ok(());
        };
        let mut items = read_set(&*self.state, self.index)?;
        items.remove(last);
        self.state.write_raw(self.index, Value::Set(items))
    }
}

/// Keys of a map property.
pub struct KeySetView<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> KeySetView<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn to_set(&self) -> Result<BTreeSet<Value>> {
        Ok(read_map(&*self.state, self.index)?.into_keys().collect())
    }

    pub fn contains(&self, key: &Value) -> Result<bool> {
        Ok(read_map(&*self.state, self.index)?.contains_key(key))
    }

    pub fn remove(&mut self, key: impl Into<Value>) -> Result<bool> {
        let mut entries = read_map(&*self.state, self.index)?;
        let removed = entries.remove(&key.into()).is_some();
        self.state.write_raw(self.index, Value::Map(entries))?;
        Ok(removed)
    }

    pub fn retain<V: Into<Value>>(&mut self, keys: impl IntoIterator<Item = V>) -> Result<()> {
        let keep = keys.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        let mut entries = read_map(&*self.state, self.index)?;
        entries.retain(|k, _| keep.contains(k));
        self.state.write_raw(self.index, Value::Map(entries))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.state.write_raw(self.index, Value::Map(Default::default()))
    }
}

/// Values of a map property.
pub struct ValuesView<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> ValuesView<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        Ok(read_map(&*self.state, self.index)?.into_values().collect())
    }

    /// Removes the first entry, in key order, holding `value`.
    pub fn remove(&mut self, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let mut entries = read_map(&*self.state, self.index)?;
        let Some(key) = entries
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(k, _)| k.clone())
        else {
            return Ok(false);
        };
        entries.remove(&key);
        self.state.write_raw(self.index, Value::Map(entries))?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.state.write_raw(self.index, Value::Map(Default::default()))
    }
}

/// Entries of a map property.
pub struct EntrySetView<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> EntrySetView<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn to_vec(&self) -> Result<Vec<(Value, Value)>> {
        Ok(read_map(&*self.state, self.index)?.into_iter().collect())
    }

    pub fn remove(&mut self, key: impl Into<Value>) -> Result<bool> {
        let mut entries = read_map(&*self.state, self.index)?;
        let removed = entries.remove(&key.into()).is_some();
        self.state.write_raw(self.index, Value::Map(entries))?;
        Ok(removed)
    }

    /// Replaces the value of an existing entry.
    pub fn set_value(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let mut entries = read_map(&*self.state, self.index)?;
        let previous = match entries.get_mut(&key.into()) {
            Some(slot) => Some(std::mem::replace(slot, value.into())),
            None => None,
        };
        self.state.write_raw(self.index, Value::Map(entries))?;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::PersistenceContext;
    use crate::core::Value;
    use crate::meta::fixtures::{User, user};
    use crate::meta::{EntityMeta, PrimaryKeyValue};
    use crate::proxy::ProxyState;
    use crate::wrapper::{ListWrapper, MapWrapper, SetWrapper};

    fn state() -> ProxyState<User> {
        let meta = EntityMeta::for_type::<User>().unwrap();
        let mut entity = user(1, "John");
        entity.tags = vec!["a".into(), "b".into(), "c".into()];
        entity.labels = ["x".to_string(), "y".to_string()].into_iter().collect();
        entity.prefs.insert(1, "one".to_string());
        entity.prefs.insert(2, "two".to_string());
        let key = PrimaryKeyValue::simple("id", Value::from(1));
        ProxyState::new(entity, key, PersistenceContext::detached(meta))
    }

    fn index(state: &ProxyState<User>, name: &str) -> usize {
        state.meta().property(name).unwrap().index()
    }

    #[test]
    fn test_sub_list_edits_are_untracked() {
        let mut state = state();
        let tags = index(&state, "tags");
        {
            let mut list = ListWrapper::new(&mut state, tags);
            let mut window = list.sub_list(1, 3).unwrap();
            assert_eq!(window.remove(0).unwrap(), Value::from("b"));
            window.set(0, "z").unwrap();
        }
        assert_eq!(state.target.tags, vec!["a", "z"]);
        assert!(!state.is_dirty());
        assert!(state.pending_ops(tags).is_empty());
    }

    #[test]
    fn test_list_cursor_edits_are_untracked() {
        let mut state = state();
        let tags = index(&state, "tags");
        {
            let mut list = ListWrapper::new(&mut state, tags);
            let mut cursor = list.cursor();
            cursor.next().unwrap();
            cursor.remove().unwrap();
            assert_eq!(cursor.next().unwrap(), Some(Value::from("b")));
        }
        assert_eq!(state.target.tags, vec!["b", "c"]);
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_set_cursor_edits_are_untracked() {
        let mut state = state();
        let labels = index(&state, "labels");
        {
            let mut set = SetWrapper::new(&mut state, labels);
            let mut cursor = set.cursor();
            assert_eq!(cursor.next().unwrap(), Some(Value::from("x")));
            cursor.remove().unwrap();
            assert_eq!(cursor.next().unwrap(), Some(Value::from("y")));
            assert_eq!(cursor.next().unwrap(), None);
        }
        assert_eq!(state.target.labels.len(), 1);
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_map_views_are_untracked() {
        let mut state = state();
        let prefs = index(&state, "prefs");
        {
            let mut map = MapWrapper::new(&mut state, prefs);
            assert!(map.key_set().remove(1).unwrap());
            assert!(map.values().remove("two").unwrap());
        }
        assert!(state.target.prefs.is_empty());
        {
            let mut map = MapWrapper::new(&mut state, prefs);
            map.put(3, "three").unwrap();
            map.entry_set().set_value(3, "drei").unwrap();
        }
        assert_eq!(state.target.prefs.get(&3).map(String::as_str), Some("drei"));
        assert_eq!(state.pending_ops(prefs).len(), 1);
    }
}
