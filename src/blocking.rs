//! Blocking calling convention.
//!
//! Each call returns once the underlying store call has completed. From
//! inside a multi-threaded runtime the wait happens in `block_in_place`.

use crate::core::{MapperError, Result, Value};
use crate::future::Empty;
use crate::manager::{Batch, Options, PersistenceManager, SliceQueryBuilder};
use crate::meta::{Entity, Id};
use crate::proxy::EntityProxy;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

pub fn block_on_mapper<F, T>(rt: &Handle, f: F) -> T
where
    F: Future<Output = T>,
{
    match Handle::try_current() {
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

#[derive(Clone)]
pub struct BlockingManager {
    inner: PersistenceManager,
    rt: Handle,
    _runtime: Option<Arc<Runtime>>,
}

impl BlockingManager {
    pub fn new(inner: PersistenceManager, rt: Handle) -> Self {
        Self {
            inner,
            rt,
            _runtime: None,
        }
    }

    /// Owns a dedicated multi-threaded runtime.
    pub fn with_runtime(inner: PersistenceManager) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| MapperError::ExecutionError(format!("runtime: {}", err)))?;
        Ok(Self {
            inner,
            rt: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }

    pub fn manager(&self) -> &PersistenceManager {
        &self.inner
    }

    pub fn block_on<F: Future>(&self, f: F) -> F::Output {
        block_on_mapper(&self.rt, f)
    }

    pub fn insert<T: Entity>(&self, entity: T) -> Result<EntityProxy<T>> {
        self.block_on(self.inner.insert(entity))
    }

    pub fn insert_with<T: Entity>(&self, entity: T, options: Options) -> Result<EntityProxy<T>> {
        self.block_on(self.inner.insert_with(entity, options))
    }

    pub fn update<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.block_on(self.inner.update(proxy))
    }

    pub fn update_with<T: Entity>(&self, proxy: &mut EntityProxy<T>, options: Options) -> Result<()> {
        self.block_on(self.inner.update_with(proxy, options))
    }

    pub fn remove<T: Entity>(&self, proxy: &EntityProxy<T>) -> Result<()> {
        self.block_on(self.inner.remove(proxy))
    }

    pub fn remove_with<T: Entity>(&self, proxy: &EntityProxy<T>, options: Options) -> Result<()> {
        self.block_on(self.inner.remove_with(proxy, options))
    }

    pub fn remove_by_id<T: Entity>(&self, id: impl Into<Id>) -> Result<()> {
        self.block_on(self.inner.remove_by_id::<T>(id))
    }

    pub fn find<T: Entity>(&self, id: impl Into<Id>) -> Result<Option<EntityProxy<T>>> {
        self.block_on(self.inner.find(id))
    }

    pub fn find_with<T: Entity>(
        &self,
        id: impl Into<Id>,
        options: Options,
    ) -> Result<Option<EntityProxy<T>>> {
        self.block_on(self.inner.find_with(id, options))
    }

    pub fn get_proxy<T: Entity>(&self, id: impl Into<Id>) -> Result<EntityProxy<T>> {
        self.inner.get_proxy(id)
    }

    pub fn refresh<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.block_on(self.inner.refresh(proxy))
    }

    pub fn initialize<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.block_on(self.inner.initialize(proxy))
    }

    /// Intercepted read; may load a lazy property.
    pub fn get<T: Entity>(&self, proxy: &mut EntityProxy<T>, name: &str) -> Result<Value> {
        self.block_on(proxy.get(name))
    }

    pub fn slice<T: Entity>(&self, query: SliceQueryBuilder<T>) -> Result<Vec<EntityProxy<T>>> {
        self.block_on(query.get())
    }

    pub fn create_batch(&self) -> BlockingBatch {
        BlockingBatch::new(self.inner.create_batch(), self.rt.clone())
    }

    pub fn create_ordered_batch(&self) -> BlockingBatch {
        BlockingBatch::new(self.inner.create_ordered_batch(), self.rt.clone())
    }
}

/// `Batch` whose flush blocks.
pub struct BlockingBatch {
    inner: Batch,
    rt: Handle,
}

impl BlockingBatch {
    pub fn new(inner: Batch, rt: Handle) -> Self {
        Self { inner, rt }
    }

    pub fn batch(&mut self) -> &mut Batch {
        &mut self.inner
    }

    pub fn end_batch(&mut self) -> Result<Empty> {
        block_on_mapper(&self.rt, self.inner.end_batch())?;
        Ok(Empty)
    }
}

impl std::ops::Deref for BlockingBatch {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        &self.inner
    }
}

impl std::ops::DerefMut for BlockingBatch {
    fn deref_mut(&mut self) -> &mut Batch {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::meta::fixtures::{User, user};
    use crate::store::InMemoryColumnStore;

    fn blocking() -> BlockingManager {
        let manager = PersistenceManager::new(
            Arc::new(InMemoryColumnStore::new()),
            MapperConfig::default(),
        );
        BlockingManager::with_runtime(manager).unwrap()
    }

    #[test]
    fn test_blocking_crud() {
        let mapper = blocking();
        let mut proxy = mapper.insert(user(1, "John")).unwrap();
        proxy.set("bio", "about me").unwrap();
        mapper.update(&mut proxy).unwrap();

        let mut found = mapper.find::<User>(1).unwrap().unwrap();
        assert_eq!(mapper.get(&mut found, "bio").unwrap(), Value::from("about me"));

        mapper.remove(&found).unwrap();
        assert!(mapper.find::<User>(1).unwrap().is_none());
    }

    #[test]
    fn test_blocking_batch() {
        let mapper = blocking();
        let mut batch = mapper.create_ordered_batch();
        batch.start_batch().unwrap();
        batch.insert(user(2, "John")).unwrap();
        assert_eq!(batch.end_batch().unwrap(), Empty);
        assert!(mapper.find::<User>(2).unwrap().is_some());
    }
}
