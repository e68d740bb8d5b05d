use super::views::{EntrySetView, KeySetView, ValuesView};
use super::{CollectionOp, read_map};
use crate::core::{Result, Value};
use crate::meta::Entity;
use crate::proxy::ProxyState;
use std::collections::{BTreeMap, BTreeSet};

/// Tracked view of a map property.
pub struct MapWrapper<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> MapWrapper<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn property(&self) -> &str {
        self.state.meta().property_at(self.index).name()
    }

    fn entries(&self) -> Result<BTreeMap<Value, Value>> {
        read_map(&*self.state, self.index)
    }

    fn commit(&mut self, entries: BTreeMap<Value, Value>, op: CollectionOp) -> Result<()> {
        self.state.write_raw(self.index, Value::Map(entries))?;
        self.state.record(self.index, op);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries()?.is_empty())
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    pub fn to_map(&self) -> Result<BTreeMap<Value, Value>> {
        self.entries()
    }

    /// Returns the previous value.
    pub fn put(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Result<Option<Value>> {
        let (key, value) = (key.into(), value.into());
        let mut entries = self.entries()?;
        let previous = entries.insert(key.clone(), value.clone());
        let mut put = BTreeMap::new();
        put.insert(key, value);
        self.commit(entries, CollectionOp::PutEntries(put))?;
        Ok(previous)
    }

    pub fn put_all<K: Into<Value>, V: Into<Value>>(
        &mut self,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()> {
        let put = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<BTreeMap<_, _>>();
        let mut entries = self.entries()?;
        entries.extend(put.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.commit(entries, CollectionOp::PutEntries(put))
    }

    pub fn remove(&mut self, key: impl Into<Value>) -> Result<Option<Value>> {
        let key = key.into();
        let mut entries = self.entries()?;
        let Some(previous) = entries.remove(&key) else {
            return Ok(None);
        };
        let keys = BTreeSet::from([key]);
        self.commit(entries, CollectionOp::RemoveKeys(keys))?;
        Ok(Some(previous))
    }

    pub fn clear(&mut self) -> Result<()> {
        self.commit(BTreeMap::new(), CollectionOp::Clear)
    }

    /// Untracked key set.
    pub fn key_set(&mut self) -> KeySetView<'_, T> {
        KeySetView::new(self.state, self.index)
    }

    /// Untracked values.
    pub fn values(&mut self) -> ValuesView<'_, T> {
        ValuesView::new(self.state, self.index)
    }

    /// Untracked entries.
    pub fn entry_set(&mut self) -> EntrySetView<'_, T> {
        EntrySetView::new(self.state, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PersistenceContext;
    use crate::meta::fixtures::{User, user};
    use crate::meta::{EntityMeta, PrimaryKeyValue};

    fn state() -> (ProxyState<User>, usize) {
        let meta = EntityMeta::for_type::<User>().unwrap();
        let mut entity = user(1, "John");
        entity.prefs.insert(1, "dark".to_string());
        let key = PrimaryKeyValue::simple("id", Value::from(1));
        let index = meta.property("prefs").unwrap().index();
        (
            ProxyState::new(entity, key, PersistenceContext::detached(meta)),
            index,
        )
    }

    #[test]
    fn test_put_and_remove() {
        let (mut state, index) = state();
        let mut map = MapWrapper::new(&mut state, index);
        assert_eq!(map.put(1, "light").unwrap(), Some(Value::from("dark")));
        assert_eq!(map.remove(1).unwrap(), Some(Value::from("light")));
        assert_eq!(map.remove(1).unwrap(), None);
        map.put_all([(2, "a"), (3, "b")]).unwrap();

        assert_eq!(state.target.prefs.len(), 2);
        assert_eq!(state.pending_ops(index).len(), 3);
    }
}
