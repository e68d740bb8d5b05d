// ============================================================================
// Entity Metadata
// ============================================================================
//
// Static, immutable mapping metadata per entity type plus the accessor
// vtable (`Entity`) the interceptor calls through. Metadata is produced once
// per type and shared read-only by every proxy of that type.
//
// ============================================================================

pub mod entity;
pub mod property;

pub use entity::{EntityMeta, EntityMetaBuilder, Id, PrimaryKeyMeta, PrimaryKeyValue};
pub use property::{
    CollectionType, GetterHandle, PropertyDescriptor, PropertyKind, PropertySpec, SetterHandle,
};

use crate::core::{MapperError, Result, Value};
use crate::manager::validation::ConstraintViolation;
use lazy_static::lazy_static;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A mapped domain type.
///
/// `get_raw`/`set_raw` are the accessor vtable: plain field reads and writes
/// with no interception. Usually generated by `#[derive(Entity)]`.
pub trait Entity: Default + Send + Sync + 'static {
    /// Describes the type; called once, then cached.
    fn entity_meta() -> Result<EntityMeta>;

    fn get_raw(&self, property: &str) -> Result<Value>;

    fn set_raw(&mut self, property: &str, value: Value) -> Result<()>;

    /// Constraint violations reported to bean validation.
    fn validate(&self) -> Vec<ConstraintViolation> {
        Vec::new()
    }
}

lazy_static! {
    static ref META_REGISTRY: RwLock<HashMap<TypeId, Arc<EntityMeta>>> =
        RwLock::new(HashMap::new());
}

impl EntityMeta {
    /// Cached metadata for `T`.
    pub fn for_type<T: Entity>() -> Result<Arc<EntityMeta>> {
        let type_id = TypeId::of::<T>();
        if let Some(meta) = META_REGISTRY.read()?.get(&type_id) {
            return Ok(meta.clone());
        }

        let meta = Arc::new(T::entity_meta()?);
        let mut registry = META_REGISTRY.write()?;
        Ok(registry.entry(type_id).or_insert(meta).clone())
    }
}

/// Error for a property name the accessor vtable does not know.
pub fn unknown_property(type_name: &str, property: &str) -> MapperError {
    MapperError::PropertyNotFound(property.to_string(), type_name.to_string())
}


#[cfg(test)]
mod tests {
    use super::fixtures::User;
    use super::*;

    #[test]
    fn test_meta_is_cached_per_type() {
        let first = EntityMeta::for_type::<User>().unwrap();
        let second = EntityMeta::for_type::<User>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table(), "users");
    }

    #[test]
    fn test_accessor_vtable() {
        let mut user = User::default();
        user.set_raw("name", Value::from("John")).unwrap();
        assert_eq!(user.get_raw("name").unwrap(), Value::from("John"));
        assert!(user.get_raw("missing").is_err());
        assert!(user.set_raw("id", Value::from("not a number")).is_err());
    }
}
