// ============================================================================
// Persistence Context
// ============================================================================
//
// The collaborator proxies call back into for lazy loads, join resolution
// and counter access. A context never owns the manager: it holds a weak
// handle, and every operation on a context whose manager is gone fails with
// `ContextClosed`.
//
// ============================================================================

pub mod consistency;
pub mod flush;
pub mod timestamp;

pub use consistency::{ConsistencyOverrides, ConsistencyResolver};
pub use flush::{BatchOrdering, FlushContext, FlushState};
pub use timestamp::TimestampGenerator;

use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result, Row, Value};
use crate::manager::ManagerShared;
use crate::meta::{Entity, EntityMeta, Id, PrimaryKeyValue, PropertyDescriptor};
use crate::proxy::{CounterHandle, EntityProxy, ProxyState};
use log::debug;
use std::sync::{Arc, Weak};
use tracing::Instrument;

#[derive(Clone)]
pub struct PersistenceContext {
    shared: Weak<ManagerShared>,
    meta: Arc<EntityMeta>,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("entity", &self.meta.type_name())
            .field("open", &self.is_open())
            .finish()
    }
}

impl PersistenceContext {
    pub(crate) fn new(shared: &Arc<ManagerShared>, meta: Arc<EntityMeta>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            meta,
        }
    }

    /// A context bound to no manager; every store access fails.
    pub fn detached(meta: Arc<EntityMeta>) -> Self {
        Self {
            shared: Weak::new(),
            meta,
        }
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub fn is_open(&self) -> bool {
        self.shared.strong_count() > 0
    }

    pub(crate) fn shared(&self) -> Result<Arc<ManagerShared>> {
        self.shared.upgrade().ok_or(MapperError::ContextClosed)
    }

    /// Fetches one lazy column and writes it into `target`.
    pub async fn load_property_into_object<T: Entity>(
        &self,
        key: &PrimaryKeyValue,
        target: &mut T,
        property: &PropertyDescriptor,
    ) -> Result<()> {
        self.load_properties(key, target, std::slice::from_ref(property))
            .await
    }

    /// Fetches several columns in one read. A missing row loads nulls.
    pub async fn load_properties<T: Entity>(
        &self,
        key: &PrimaryKeyValue,
        target: &mut T,
        properties: &[PropertyDescriptor],
    ) -> Result<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let shared = self.shared()?;
        let field_level =
            ConsistencyResolver::strongest_field_level(properties.iter(), AccessKind::Read);
        let level = shared
            .resolver
            .resolve(&self.meta, field_level, AccessKind::Read, None, None);
        let columns = properties
            .iter()
            .map(|p| p.column().to_string())
            .collect::<Vec<_>>();

        let span = tracing::info_span!(
            "mapper.entity.load",
            entity_type = %self.meta.type_name(),
            key = %key,
            columns = columns.len()
        );
        let row = shared
            .store
            .read_row(self.meta.table(), key, &columns, level)
            .instrument(span)
            .await?;

        for property in properties {
            let value = row
                .as_ref()
                .and_then(|row| row.get(property.column()).cloned())
                .unwrap_or(Value::Null);
            target.set_raw(property.name(), value)?;
        }
        debug!(
            "loaded {} lazy column(s) of {} {}",
            properties.len(),
            self.meta.type_name(),
            key
        );
        Ok(())
    }

    /// Context for the entity type a join property points at.
    pub fn create_context_for_join<J: Entity>(
        &self,
        property: &PropertyDescriptor,
    ) -> Result<PersistenceContext> {
        let related = EntityMeta::for_type::<J>()?;
        if property.join_entity() != Some(related.type_name()) {
            return Err(MapperError::TypeMismatch(format!(
                "property '{}' joins {:?}, not '{}'",
                property.name(),
                property.join_entity(),
                related.type_name()
            )));
        }
        Ok(PersistenceContext {
            shared: self.shared.clone(),
            meta: related,
        })
    }

    /// Reads the eager columns of one row and proxies it.
    pub async fn find<T: Entity>(
        &self,
        key: &PrimaryKeyValue,
        consistency: Option<ConsistencyLevel>,
    ) -> Result<Option<EntityProxy<T>>> {
        let shared = self.shared()?;
        let level = shared
            .resolver
            .resolve(&self.meta, None, AccessKind::Read, consistency, None);

        let span = tracing::info_span!(
            "mapper.entity.find",
            entity_type = %self.meta.type_name(),
            key = %key,
            consistency = %level
        );
        let row = shared
            .store
            .read_row(self.meta.table(), key, &self.meta.eager_columns(), level)
            .instrument(span)
            .await?;

        row.map(|row| self.materialize(&row)).transpose()
    }

    /// Builds an entity from a stored row; lazy properties stay unloaded.
    pub fn materialize<T: Entity>(&self, row: &Row) -> Result<EntityProxy<T>> {
        let key = self.meta.key_from_row(row)?;
        let mut target = T::default();
        for (component, (_, value)) in self
            .meta
            .primary_key()
            .components()
            .iter()
            .zip(key.components())
        {
            target.set_raw(component.name(), value.clone())?;
        }
        self.fill_eager(&mut target, row)?;
        Ok(self.build_proxy(target, key))
    }

    pub(crate) fn fill_eager<T: Entity>(&self, target: &mut T, row: &Row) -> Result<()> {
        for property in self.meta.properties() {
            if property.kind().is_lazy() || property.kind().is_counter() {
                continue;
            }
            let value = row.get(property.column()).cloned().unwrap_or(Value::Null);
            target.set_raw(property.name(), value)?;
        }
        Ok(())
    }

    pub fn build_proxy<T: Entity>(&self, target: T, key: PrimaryKeyValue) -> EntityProxy<T> {
        EntityProxy::from_state(ProxyState::new(target, key, self.clone()))
    }

    /// Binds a raw join value as the related entity's key.
    pub fn bind_key(&self, raw: Value) -> Result<PrimaryKeyValue> {
        self.meta.bind_key(Id::from(raw))
    }

    pub fn counter_handle(
        &self,
        key: &PrimaryKeyValue,
        property: &PropertyDescriptor,
    ) -> Result<CounterHandle> {
        if !property.kind().is_counter() {
            return Err(MapperError::TypeMismatch(format!(
                "property '{}' is {}, not a counter",
                property.name(),
                property.kind()
            )));
        }
        let shared = self.shared()?;
        let read = shared.resolver.resolve(
            &self.meta,
            ConsistencyResolver::field_level(property, AccessKind::Read),
            AccessKind::Read,
            None,
            None,
        );
        let write = shared.resolver.resolve(
            &self.meta,
            ConsistencyResolver::field_level(property, AccessKind::Write),
            AccessKind::Write,
            None,
            None,
        );
        Ok(CounterHandle::new(
            self.clone(),
            key.clone(),
            property.column(),
            read,
            write,
        ))
    }
}
