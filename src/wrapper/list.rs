use super::views::{ListCursor, SubListView};
use super::{CollectionOp, out_of_bounds, read_list};
use crate::core::{ColumnValue, MapperError, Result, Value};
use crate::meta::Entity;
use crate::proxy::ProxyState;

/// Tracked view of a list property.
///
/// The store's list type supports append, prepend, replacement at an index
/// and removal; inserting in the middle has no store equivalent and fails.
pub struct ListWrapper<'a, T: Entity> {
    state: &'a mut ProxyState<T>,
    index: usize,
}

impl<'a, T: Entity> ListWrapper<'a, T> {
    pub(crate) fn new(state: &'a mut ProxyState<T>, index: usize) -> Self {
        Self { state, index }
    }

    pub fn property(&self) -> &str {
        self.state.meta().property_at(self.index).name()
    }

    fn items(&self) -> Result<Vec<Value>> {
        read_list(&*self.state, self.index)
    }

    fn commit(&mut self, items: Vec<Value>, op: CollectionOp) -> Result<()> {
        self.state.write_raw(self.index, Value::List(items))?;
        self.state.record(self.index, op);
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.items()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.items()?.is_empty())
    }

    pub fn get(&self, index: usize) -> Result<Option<Value>> {
        Ok(self.items()?.get(index).cloned())
    }

    pub fn contains(&self, value: &Value) -> Result<bool> {
        Ok(self.items()?.contains(value))
    }

    pub fn index_of(&self, value: &Value) -> Result<Option<usize>> {
        Ok(self.items()?.iter().position(|item| item == value))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.items()
    }

    pub fn values<V: ColumnValue>(&self) -> Result<Vec<V>> {
        self.items()?.into_iter().map(V::from_value).collect()
    }

    /// Appends.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut items = self.items()?;
        items.push(value.clone());
        self.commit(items, CollectionOp::Append(vec![value]))
    }

    pub fn add_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<()> {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        let mut items = self.items()?;
        items.extend(values.iter().cloned());
        self.commit(items, CollectionOp::Append(values))
    }

    /// Index 0 prepends and index `len` appends; any other position fails.
    pub fn insert(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        self.insert_all(index, [value.into()])
    }

    pub fn insert_all<V: Into<Value>>(
        &mut self,
        index: usize,
        values: impl IntoIterator<Item = V>,
    ) -> Result<()> {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        let mut items = self.items()?;
        let len = items.len();
        if index > len {
            return Err(out_of_bounds(index, len));
        }
        if index == 0 {
            let mut prepended = values.clone();
            prepended.append(&mut items);
            return self.commit(prepended, CollectionOp::Prepend(values));
        }
        if index == len {
            items.extend(values.iter().cloned());
            return self.commit(items, CollectionOp::Append(values));
        }
        Err(MapperError::UnsupportedOperation(format!(
            "Cannot insert at index {} of list '{}'. Supported list operations: \
             append, prepend, set at index, remove at index, remove by value",
            index,
            self.property()
        )))
    }

    /// Replaces the element at `index`, returning the previous one.
    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        let mut items = self.items()?;
        let len = items.len();
        let slot = items.get_mut(index).ok_or_else(|| out_of_bounds(index, len))?;
        let previous = std::mem::replace(slot, value.clone());
        self.commit(items, CollectionOp::SetAt { index, value })?;
        Ok(previous)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Value> {
        let mut items = self.items()?;
        if index >= items.len() {
            return Err(out_of_bounds(index, items.len()));
        }
        let removed = items.remove(index);
        self.commit(items, CollectionOp::RemoveAt(index))?;
        Ok(removed)
    }

    /// Removes every occurrence of `value`, as the store does.
    pub fn remove_value(&mut self, value: impl Into<Value>) -> Result<bool> {
        self.remove_all([value.into()])
    }

    pub fn remove_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<bool> {
        let values = values.into_iter().map(Into::into).collect::<Vec<_>>();
        let mut items = self.items()?;
        let before = items.len();
        items.retain(|item| !values.contains(item));
        if items.len() == before {
            return Ok(false);
        }
        self.commit(items, CollectionOp::RemoveValues(values))?;
        Ok(true)
    }

    /// Keeps only `values`; recorded as a removal of everything else.
    pub fn retain_all<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> Result<bool> {
        let keep = values.into_iter().map(Into::into).collect::<Vec<_>>();
        let items = self.items()?;
        let mut complement = Vec::new();
        for item in &items {
            if !keep.contains(item) && !complement.contains(item) {
                complement.push(item.clone());
            }
        }
        if complement.is_empty() {
            return Ok(false);
        }
        let kept = items.into_iter().filter(|item| keep.contains(item)).collect();
        self.commit(kept, CollectionOp::RemoveValues(complement))?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.commit(Vec::new(), CollectionOp::Clear)
    }

    /// Untracked window over `[from, to)`.
    pub fn sub_list(&mut self, from: usize, to: usize) -> Result<SubListView<'_, T>> {
        let len = self.items()?.len();
        if from > to || to > len {
            return Err(out_of_bounds(to, len));
        }
        Ok(SubListView::new(self.state, self.index, from, to))
    }

    /// Untracked cursor.
    pub fn cursor(&mut self) -> ListCursor<'_, T> {
        ListCursor::new(self.state, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PersistenceContext;
    use crate::meta::fixtures::{User, user};
    use crate::meta::{EntityMeta, PrimaryKeyValue};

    fn state(tags: &[&str]) -> (ProxyState<User>, usize) {
        let meta = EntityMeta::for_type::<User>().unwrap();
        let mut entity = user(1, "John");
        entity.tags = tags.iter().map(|t| t.to_string()).collect();
        let key = PrimaryKeyValue::simple("id", Value::from(1));
        let index = meta.property("tags").unwrap().index();
        (
            ProxyState::new(entity, key, PersistenceContext::detached(meta)),
            index,
        )
    }

    #[test]
    fn test_middle_insert_is_unsupported() {
        let (mut state, index) = state(&["foo", "bar"]);
        let mut list = ListWrapper::new(&mut state, index);

        let err = list.insert(1, "qux").unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedOperation(_)));
        assert!(err.to_string().contains("append, prepend"));
        assert!(!state.is_dirty());
        assert_eq!(state.target.tags, vec!["foo", "bar"]);
    }

    #[test]
    fn test_append_then_remove_at() {
        let (mut state, index) = state(&["foo", "bar"]);
        let mut list = ListWrapper::new(&mut state, index);
        list.push("qux").unwrap();
        assert_eq!(list.remove_at(0).unwrap(), Value::from("foo"));

        assert_eq!(state.target.tags, vec!["bar", "qux"]);
        assert_eq!(
            state.pending_ops(index),
            &[
                CollectionOp::Append(vec![Value::from("qux")]),
                CollectionOp::RemoveAt(0)
            ]
        );
    }

    #[test]
    fn test_prepend_and_tail_insert() {
        let (mut state, index) = state(&["b"]);
        let mut list = ListWrapper::new(&mut state, index);
        list.insert(0, "a").unwrap();
        list.insert(2, "c").unwrap();
        assert_eq!(state.target.tags, vec!["a", "b", "c"]);
        assert_eq!(state.pending_ops(index)[0], CollectionOp::Prepend(vec![Value::from("a")]));
    }

    #[test]
    fn test_set_and_bounds() {
        let (mut state, index) = state(&["a"]);
        let mut list = ListWrapper::new(&mut state, index);
        assert_eq!(list.set(0, "z").unwrap(), Value::from("a"));
        assert!(matches!(
            list.set(3, "y"),
            Err(MapperError::IndexOutOfBounds { index: 3, len: 1 })
        ));
        assert!(list.remove_at(5).is_err());
        assert_eq!(state.pending_ops(index).len(), 1);
    }

    #[test]
    fn test_retain_records_complement() {
        let (mut state, index) = state(&["a", "b", "a", "c"]);
        let mut list = ListWrapper::new(&mut state, index);
        assert!(list.retain_all(["a"]).unwrap());
        assert!(!list.retain_all(["a"]).unwrap());

        assert_eq!(state.target.tags, vec!["a", "a"]);
        assert_eq!(
            state.pending_ops(index),
            &[CollectionOp::RemoveValues(vec![Value::from("b"), Value::from("c")])]
        );
    }

    #[test]
    fn test_clear_then_append() {
        let (mut state, index) = state(&["a"]);
        let mut list = ListWrapper::new(&mut state, index);
        list.clear().unwrap();
        list.add_all(["x", "y"]).unwrap();
        assert_eq!(list.values::<String>().unwrap(), vec!["x", "y"]);
        assert_eq!(
            state.pending_ops(index),
            &[
                CollectionOp::Clear,
                CollectionOp::Append(vec![Value::from("x"), Value::from("y")])
            ]
        );
    }

    #[test]
    fn test_remove_value_removes_all_occurrences() {
        let (mut state, index) = state(&["a", "b", "a"]);
        let mut list = ListWrapper::new(&mut state, index);
        assert!(list.remove_value("a").unwrap());
        assert!(!list.remove_value("zzz").unwrap());
        assert_eq!(state.target.tags, vec!["b"]);
        assert_eq!(state.pending_ops(index).len(), 1);
    }
}
