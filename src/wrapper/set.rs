use super::views::SetCursor;
use super::{CollectionOp, read_set};
use crate::core::{ColumnValue, Result, Value};
use crate::meta::Entity;
use crate::proxy::ProxyState;
use std::collections::BTreeSet;

/// Tracked view of a set property.
pub struct SetWrapper<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> SetWrapper<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn property(&self) -> &str {
        self.state.meta().property_at(self.index).name()
    }

    fn items(&self) -> Result<BTreeSet<Value>> {
        read_set(&*self.state, self.index)
    }

    fn commit(&mut self, items: BTreeSet<Value>, op: CollectionOp) -> Result<()> {
        self.state.write_raw(self.index, Value::Set(items))?;
        self.state.record(self.index, op);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.items()?.is_empty())
    }

    pub fn contains(&self, value: &Value) -> Result<bool> {
        Ok(self.items()?.contains(value))
    }

    pub fn to_set(&self) -> Result<BTreeSet<Value>> {
        self.items()
    }

    pub fn values<V: ColumnValue + Ord>(&self) -> Result<BTreeSet<V>> {
        self.items()?.into_iter().map(V::from_value).collect()
    }

    /// Returns whether the element was absent. The add is recorded either
    /// way, since the store may have diverged from memory.
    pub fn insert(&mut self, value: impl Into<Value>) -> Result<bool> {
        self.add_all([value.into()])
    }

    pub fn add_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<bool> {
        let values = values.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        let mut items = self.items()?;
        let before = items.len();
        items.extend(values.iter().cloned());
        let changed = items.len() != before;
        self.commit(items, CollectionOp::AddElements(values))?;
        Ok(changed)
    }

    pub fn remove(&mut self, value: impl Into<Value>) -> Result<bool> {
        self.remove_all([value.into()])
    }

    pub fn remove_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<bool> {
        let values = values.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        let mut items = self.items()?;
        let before = items.len();
        items.retain(|item| !values.contains(item));
        if items.len() == before {
            return Ok(false);
        }
        self.commit(items, CollectionOp::RemoveElements(values))?;
        Ok(true)
    }

    /// Keeps only `values`; recorded as a removal of everything else.
    pub fn retain_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<bool> {
        let keep = values.into_iter().map(Into::into).collect::<BTreeSet<_>>();
        let items = self.items()?;
        let (kept, removed): (BTreeSet<_>, BTreeSet<_>) =
            items.into_iter().partition(|item| keep.contains(item));
        if removed.is_empty() {
            return Ok(false);
        }
        self.commit(kept, CollectionOp::RemoveElements(removed))?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.commit(BTreeSet::new(), CollectionOp::Clear)
    }

    /// Untracked cursor.
    pub fn cursor(&mut self) -> SetCursor<'_, T> {
        SetCursor::new(self.state, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PersistenceContext;
    use crate::meta::fixtures::{User, user};
    use crate::meta::{EntityMeta, PrimaryKeyValue};

    fn state(labels: &[&str]) -> (ProxyState<User>, usize) {
        let meta = EntityMeta::for_type::<User>().unwrap();
        let mut entity = user(1, "John");
        entity.labels = labels.iter().map(|l| l.to_string()).collect();
        let key = PrimaryKeyValue::simple("id", Value::from(1));
        let index = meta.property("labels").unwrap().index();
        (
            ProxyState::new(entity, key, PersistenceContext::detached(meta)),
            index,
        )
    }

    #[test]
    fn test_add_and_remove_are_recorded() {
        let (mut state, index) = state(&["a"]);
        let mut set = SetWrapper::new(&mut state, index);
        assert!(set.insert("b").unwrap());
        assert!(set.remove("a").unwrap());
        assert!(!set.remove("missing").unwrap());

        assert_eq!(state.target.labels.len(), 1);
        assert_eq!(state.pending_ops(index).len(), 2);
        assert!(state.is_dirty());
    }

    #[test]
    fn test_retain_all_records_complement() {
        let (mut state, index) = state(&["a", "b", "c"]);
        let mut set = SetWrapper::new(&mut state, index);
        assert!(set.retain_all(["b"]).unwrap());

        let removed = [Value::from("a"), Value::from("c")]
            .into_iter()
            .collect::<BTreeSet<_>>();
        assert_eq!(state.pending_ops(index), &[CollectionOp::RemoveElements(removed)]);
    }
}
