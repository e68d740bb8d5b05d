use super::{CounterHandle, ProxyState};
use crate::core::{ColumnValue, MapperError, Result, Value};
use crate::meta::{CollectionType, Entity, EntityMeta, PrimaryKeyValue, PropertyDescriptor};
use crate::wrapper::{CollectionOp, ListWrapper, MapWrapper, SetWrapper};
use futures::future::try_join_all;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A managed entity.
///
/// Property access is dispatched on the property's kind:
///
/// | kind | get | set |
/// | --- | --- | --- |
/// | primary key | stored key, no store access | always fails |
/// | simple | raw value | raw write, marked dirty |
/// | lazy | loaded once, then raw value | raw write, marked dirty and loaded |
/// | list / set / map | tracked wrapper, `None` when null | whole-value assignment |
/// | counter | cached `CounterHandle` | always fails |
/// | join | proxy of the related entity | raw write of the foreign key |
pub struct EntityProxy<T: Entity> {
    state: ProxyState<T>,
}

impl<T: Entity> std::fmt::Debug for EntityProxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityProxy")
            .field("entity", &self.state.meta().type_name())
            .field("key", &self.state.primary_key().to_string())
            .field("dirty", &self.dirty_properties())
            .finish()
    }
}

impl<T: Entity> EntityProxy<T> {
    pub(crate) fn from_state(state: ProxyState<T>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ProxyState<T> {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ProxyState<T> {
        &mut self.state
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        self.state.meta()
    }

    pub fn primary_key(&self) -> &PrimaryKeyValue {
        self.state.primary_key()
    }

    /// The raw entity, without triggering any load.
    pub fn target(&self) -> &T {
        &self.state.target
    }

    /// Drops the interception state and returns the raw entity.
    pub fn unwrap(self) -> T {
        self.state.target
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Names of the modified properties, in declaration order.
    pub fn dirty_properties(&self) -> Vec<String> {
        self.state
            .dirty_properties()
            .into_iter()
            .map(|property| property.name().to_string())
            .collect()
    }

    /// Collection ops queued for `name`.
    pub fn pending_ops(&self, name: &str) -> Result<&[CollectionOp]> {
        let index = self.state.meta().require_property(name)?.index();
        Ok(self.state.pending_ops(index))
    }

    pub fn is_loaded(&self, name: &str) -> Result<bool> {
        let property = self.state.meta().require_property(name)?;
        Ok(!property.kind().is_lazy() || self.state.is_loaded(property.getter()))
    }

    fn key_component(&self, name: &str) -> Option<Value> {
        let position = self
            .state
            .meta()
            .primary_key()
            .components()
            .iter()
            .position(|component| component.name() == name)?;
        self.state
            .primary_key()
            .components()
            .get(position)
            .map(|(_, value)| value.clone())
    }

    /// Loads a lazy property unless it was loaded or assigned already.
    async fn ensure_loaded(&mut self, property: &PropertyDescriptor) -> Result<()> {
        if !property.kind().is_lazy() || self.state.is_loaded(property.getter()) {
            return Ok(());
        }
        self.state
            .context
            .load_property_into_object(&self.state.primary_key, &mut self.state.target, property)
            .await?;
        self.state.mark_loaded(property.getter());
        Ok(())
    }

    /// Loads every lazy property still unloaded, in a single read.
    pub async fn initialize(&mut self) -> Result<()> {
        let pending = self
            .state
            .meta()
            .properties()
            .iter()
            .filter(|p| p.kind().is_lazy() && !self.state.is_loaded(p.getter()))
            .cloned()
            .collect::<Vec<_>>();
        if pending.is_empty() {
            return Ok(());
        }
        self.state
            .context
            .load_properties(&self.state.primary_key, &mut self.state.target, &pending)
            .await?;
        for property in &pending {
            self.state.mark_loaded(property.getter());
        }
        Ok(())
    }

    /// Intercepted read.
    pub async fn get(&mut self, name: &str) -> Result<Value> {
        if let Some(value) = self.key_component(name) {
            return Ok(value);
        }
        let meta = self.state.meta().clone();
        let property = meta.require_property(name)?;

        if property.kind().is_counter() {
            let value = self.counter(name)?.get().await?;
            return Ok(value.map(Value::Integer).unwrap_or(Value::Null));
        }
        self.ensure_loaded(property).await?;
        self.state.raw(property.index())
    }

    pub async fn get_as<V: ColumnValue>(&mut self, name: &str) -> Result<V> {
        V::from_value(self.get(name).await?)
    }

    /// Intercepted write.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.state.meta().is_primary_key(name) {
            return Err(MapperError::IllegalAccess(
                "Cannot change primary key value for existing entity".to_string(),
            ));
        }
        let meta = self.state.meta().clone();
        let property = meta.require_property(name)?;
        let kind = property.kind();
        if kind.is_counter() {
            return Err(MapperError::UnsupportedOperation(
                "Cannot set value directly to a Counter type. \
                 Please call the getter first to get handle for mutation"
                    .to_string(),
            ));
        }

        let value = value.into();
        self.state.write_raw(property.index(), value.clone())?;
        if kind.is_lazy() {
            self.state.mark_loaded(property.getter());
        }
        if kind.is_collection() {
            self.state.assign(property.index(), value);
        } else {
            self.state.mark_dirty(property.index());
        }
        debug!("{}.{} set", meta.type_name(), name);
        Ok(())
    }

    pub fn set_typed<V: ColumnValue>(&mut self, name: &str, value: &V) -> Result<()> {
        self.set(name, value.to_value())
    }

    async fn collection(&mut self, name: &str, expected: CollectionType) -> Result<Option<usize>> {
        let meta = self.state.meta().clone();
        let property = meta.require_property(name)?;
        if property.kind().collection_type() != Some(expected) {
            return Err(MapperError::TypeMismatch(format!(
                "property '{}' is {}, not a {}",
                name,
                property.kind(),
                expected
            )));
        }
        self.ensure_loaded(property).await?;
        if self.state.raw(property.index())?.is_null() {
            return Ok(None);
        }
        Ok(Some(property.index()))
    }

    /// Tracked list; `None` when the property is null.
    pub async fn list_wrapper(&mut self, name: &str) -> Result<Option<ListWrapper<'_, T>>> {
        let index = self.collection(name, CollectionType::List).await?;
        Ok(index.map(|index| ListWrapper::new(&mut self.state, index)))
    }

    /// Tracked set; `None` when the property is null.
    pub async fn set_wrapper(&mut self, name: &str) -> Result<Option<SetWrapper<'_, T>>> {
        let index = self.collection(name, CollectionType::Set).await?;
        Ok(index.map(|index| SetWrapper::new(&mut self.state, index)))
    }

    /// Tracked map; `None` when the property is null.
    pub async fn map_wrapper(&mut self, name: &str) -> Result<Option<MapWrapper<'_, T>>> {
        let index = self.collection(name, CollectionType::Map).await?;
        Ok(index.map(|index| MapWrapper::new(&mut self.state, index)))
    }

    /// Counter handle for `name`; repeated calls return the same handle.
    pub fn counter(&mut self, name: &str) -> Result<Arc<CounterHandle>> {
        let meta = self.state.meta().clone();
        let property = meta.require_property(name)?;
        if let Some(handle) = self.state.counters.get(&property.index()) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(
            self.state
                .context
                .counter_handle(&self.state.primary_key, property)?,
        );
        self.state.counters.insert(property.index(), handle.clone());
        Ok(handle)
    }

    async fn join_value(&mut self, name: &str) -> Result<(PropertyDescriptor, Value)> {
        let meta = self.state.meta().clone();
        let property = meta.require_property(name)?;
        if !property.kind().is_join() {
            return Err(MapperError::TypeMismatch(format!(
                "property '{}' is {}, not a join",
                name,
                property.kind()
            )));
        }
        self.ensure_loaded(property).await?;
        let value = self.state.raw(property.index())?;
        Ok((property.clone(), value))
    }

    async fn resolve_join<J: Entity>(
        &self,
        property: &PropertyDescriptor,
        keys: impl IntoIterator<Item = Value>,
    ) -> Result<Vec<EntityProxy<J>>> {
        let found = self
            .resolve_join_keyed::<J>(property, keys.into_iter().collect())
            .await?;
        Ok(found.into_iter().flatten().collect())
    }

    /// Fetches every target concurrently; a missing row yields `None` in place.
    async fn resolve_join_keyed<J: Entity>(
        &self,
        property: &PropertyDescriptor,
        keys: Vec<Value>,
    ) -> Result<Vec<Option<EntityProxy<J>>>> {
        let context = self.state.context.create_context_for_join::<J>(property)?;
        let keys = keys
            .into_iter()
            .map(|raw| context.bind_key(raw))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(keys.iter().map(|key| context.find::<J>(key, None))).await
    }

    /// Related entity of a join property; `None` when the foreign key is null
    /// or points at a missing row.
    pub async fn join<J: Entity>(&mut self, name: &str) -> Result<Option<EntityProxy<J>>> {
        let (property, value) = self.join_value(name).await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(self.resolve_join(&property, [value]).await?.pop())
    }

    /// Related entities of a join list, in list order. Missing rows are skipped.
    pub async fn join_list<J: Entity>(&mut self, name: &str) -> Result<Option<Vec<EntityProxy<J>>>> {
        let (property, value) = self.join_value(name).await?;
        match value {
            Value::Null => Ok(None),
            Value::List(keys) => Ok(Some(self.resolve_join(&property, keys).await?)),
            other => Err(MapperError::TypeMismatch(format!(
                "join list '{}' holds {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Related entities of a join set, in key order.
    pub async fn join_set<J: Entity>(&mut self, name: &str) -> Result<Option<Vec<EntityProxy<J>>>> {
        let (property, value) = self.join_value(name).await?;
        match value {
            Value::Null => Ok(None),
            Value::Set(keys) => Ok(Some(self.resolve_join(&property, keys).await?)),
            other => Err(MapperError::TypeMismatch(format!(
                "join set '{}' holds {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Related entities of a join map, by map key.
    pub async fn join_map<J: Entity>(
        &mut self,
        name: &str,
    ) -> Result<Option<BTreeMap<Value, EntityProxy<J>>>> {
        let (property, value) = self.join_value(name).await?;
        let entries = match value {
            Value::Null => return Ok(None),
            Value::Map(entries) => entries,
            other => {
                return Err(MapperError::TypeMismatch(format!(
                    "join map '{}' holds {}",
                    name,
                    other.type_name()
                )));
            }
        };
        let (map_keys, raw_keys): (Vec<Value>, Vec<Value>) = entries.into_iter().unzip();
        let related = self.resolve_join_keyed::<J>(&property, raw_keys).await?;
        Ok(Some(
            map_keys
                .into_iter()
                .zip(related)
                .filter_map(|(map_key, proxy)| proxy.map(|proxy| (map_key, proxy)))
                .collect(),
        ))
    }
}
