use super::CounterHandle;
use crate::context::PersistenceContext;
use crate::core::{Result, Value};
use crate::meta::{Entity, EntityMeta, GetterHandle, PrimaryKeyValue, PropertyDescriptor, SetterHandle};
use crate::wrapper::CollectionOp;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-instance interception state.
///
/// Owns the raw entity exclusively. Collection wrappers never hold the state;
/// they borrow it together with the index of their slot in `slots`, so the
/// ownership graph stays acyclic.
pub struct ProxyState<T: Entity> {
    pub(crate) target: T,
    pub(crate) meta: Arc<EntityMeta>,
    pub(crate) primary_key: PrimaryKeyValue,
    pub(crate) already_loaded: HashSet<GetterHandle>,
    pub(crate) dirty: HashMap<SetterHandle, PropertyDescriptor>,
    /// Pending collection ops, one slot per property index.
    pub(crate) slots: Vec<Vec<CollectionOp>>,
    pub(crate) counters: HashMap<usize, Arc<CounterHandle>>,
    pub(crate) context: PersistenceContext,
}

impl<T: Entity> ProxyState<T> {
    pub fn new(target: T, primary_key: PrimaryKeyValue, context: PersistenceContext) -> Self {
        let meta = context.meta().clone();
        let slots = vec![Vec::new(); meta.properties().len()];
        Self {
            target,
            meta,
            primary_key,
            already_loaded: HashSet::new(),
            dirty: HashMap::new(),
            slots,
            counters: HashMap::new(),
            context,
        }
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub fn primary_key(&self) -> &PrimaryKeyValue {
        &self.primary_key
    }

    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    pub fn is_loaded(&self, getter: GetterHandle) -> bool {
        self.already_loaded.contains(&getter)
    }

    pub(crate) fn mark_loaded(&mut self, getter: GetterHandle) {
        self.already_loaded.insert(getter);
    }

    /// Marks every lazy property loaded, for targets whose values are known.
    pub(crate) fn mark_all_loaded(&mut self) {
        for property in self.meta.properties() {
            if property.kind().is_lazy() {
                self.already_loaded.insert(property.getter());
            }
        }
    }

    pub(crate) fn mark_dirty(&mut self, index: usize) {
        let property = self.meta.property_at(index);
        if let Some(setter) = property.setter() {
            self.dirty.insert(setter, property.clone());
        }
    }

    /// Appends a collection op to the property's slot.
    pub(crate) fn record(&mut self, index: usize, op: CollectionOp) {
        self.slots[index].push(op);
        self.mark_dirty(index);
    }

    /// Whole-value assignment: replaces whatever the slot held.
    pub(crate) fn assign(&mut self, index: usize, value: Value) {
        self.slots[index] = vec![CollectionOp::Assign(value)];
        self.mark_dirty(index);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Dirty properties in declaration order.
    pub fn dirty_properties(&self) -> Vec<&PropertyDescriptor> {
        let mut dirty = self.dirty.values().collect::<Vec<_>>();
        dirty.sort_by_key(|property| property.index());
        dirty
    }

    pub fn pending_ops(&self, index: usize) -> &[CollectionOp] {
        self.slots.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn reset_dirty(&mut self) {
        self.dirty.clear();
        for slot in &mut self.slots {
            slot.clear();
        }
    }

    pub(crate) fn raw(&self, index: usize) -> Result<Value> {
        self.target.get_raw(self.meta.property_at(index).name())
    }

    /// Writes the raw field without any tracking.
    pub(crate) fn write_raw(&mut self, index: usize, value: Value) -> Result<()> {
        let meta = self.meta.clone();
        self.target.set_raw(meta.property_at(index).name(), value)
    }
}
