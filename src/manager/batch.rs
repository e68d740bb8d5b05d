use super::{Options, PersistenceManager, PreparedWrite};
use crate::context::{BatchOrdering, FlushContext, FlushState};
use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result};
use crate::future::{Callbacks, Empty, ResultHandle};
use crate::meta::{Entity, EntityMeta, Id};
use crate::proxy::EntityProxy;
use crate::store::BatchType;
use tracing::{Instrument, info_span};

/// Client-side accumulation of writes flushed as one request.
///
/// Not shareable between concurrent flows. Reads are never batched.
///
/// ```ignore
/// let mut batch = manager.create_ordered_batch();
/// batch.start_batch()?;
/// let mut user = batch.insert(User::new(10, "John"))?;
/// user.set("name", "Jane")?;
/// batch.update(&mut user)?;
/// batch.end_batch().await?;
/// ```
pub struct Batch {
    manager: PersistenceManager,
    flush: FlushContext,
}

impl Batch {
    pub(crate) fn new(manager: PersistenceManager, ordering: BatchOrdering) -> Self {
        let shared = manager.shared();
        let flush = FlushContext::new(
            ordering,
            shared.resolver.default_level(AccessKind::Write),
            shared.timestamps.clone(),
        );
        Self { manager, flush }
    }

    /// Flush without the atomicity of a logged batch.
    pub fn unlogged(mut self) -> Self {
        self.flush = self.flush.with_batch_type(BatchType::Unlogged);
        self
    }

    pub fn state(&self) -> FlushState {
        self.flush.state()
    }

    pub fn ordering(&self) -> BatchOrdering {
        self.flush.ordering()
    }

    pub fn pending_len(&self) -> usize {
        self.flush.pending_len()
    }

    /// Level the batch would flush at right now.
    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.flush.consistency_level()
    }

    pub fn flush_context(&self) -> &FlushContext {
        &self.flush
    }

    pub fn start_batch(&mut self) -> Result<()> {
        self.flush.start_batch(None)
    }

    /// Starts a batch whose statements all use `level`.
    pub fn start_batch_with(&mut self, level: ConsistencyLevel) -> Result<()> {
        self.flush.start_batch(Some(level))
    }

    fn check_options(options: &Options) -> Result<()> {
        if options.consistency().is_some() {
            return Err(MapperError::UnsupportedOperation(
                "Runtime custom Consistency Level cannot be set for batch mode. \
                 Please set the Consistency Levels at batch start with 'start_batch_with(level)'"
                    .to_string(),
            ));
        }
        if options.is_conditional() || options.cas_listener().is_some() {
            return Err(MapperError::UnsupportedOperation(
                "Cannot perform conditional writes inside a batch".to_string(),
            ));
        }
        Ok(())
    }

    fn enqueue(&mut self, prepared: PreparedWrite) -> Result<()> {
        self.flush.enqueue(prepared.statement, prepared.level)
    }

    fn ensure_accumulating(&self) -> Result<()> {
        if self.flush.is_accumulating() {
            Ok(())
        } else {
            Err(MapperError::IllegalAccess(
                "no batch in progress, call start_batch() first".to_string(),
            ))
        }
    }

    pub fn insert<T: Entity>(&mut self, entity: T) -> Result<EntityProxy<T>> {
        self.insert_with(entity, Options::none())
    }

    /// Queues an insert. Counter values cannot be batched: insert them as
    /// zero and use the counter handle once the batch is flushed.
    pub fn insert_with<T: Entity>(&mut self, entity: T, options: Options) -> Result<EntityProxy<T>> {
        Self::check_options(&options)?;
        self.ensure_accumulating()?;
        let prepared = self
            .manager
            .prepare_insert(&entity, &options, self.flush.batch_level())?;
        if !prepared.counters.is_empty() {
            return Err(MapperError::UnsupportedOperation(format!(
                "counter values of '{}' cannot be written inside a batch",
                prepared.context.meta().type_name()
            )));
        }
        let context = prepared.context.clone();
        let key = prepared.key.clone();
        self.enqueue(prepared)?;

        let mut proxy = context.build_proxy(entity, key);
        proxy.state_mut().mark_all_loaded();
        Ok(proxy)
    }

    pub fn update<T: Entity>(&mut self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.update_with(proxy, Options::none())
    }

    /// Queues the dirty properties of `proxy` and clears its dirty state.
    pub fn update_with<T: Entity>(&mut self, proxy: &mut EntityProxy<T>, options: Options) -> Result<()> {
        Self::check_options(&options)?;
        self.ensure_accumulating()?;
        let Some(prepared) = self
            .manager
            .prepare_update(proxy, &options, self.flush.batch_level())?
        else {
            return Ok(());
        };
        self.enqueue(prepared)?;
        proxy.state_mut().reset_dirty();
        Ok(())
    }

    pub fn remove<T: Entity>(&mut self, proxy: &EntityProxy<T>) -> Result<()> {
        self.remove_with(proxy, Options::none())
    }

    pub fn remove_with<T: Entity>(&mut self, proxy: &EntityProxy<T>, options: Options) -> Result<()> {
        Self::check_options(&options)?;
        self.ensure_accumulating()?;
        let prepared = self.manager.prepare_remove(
            proxy.meta().clone(),
            proxy.primary_key().clone(),
            &options,
            self.flush.batch_level(),
        )?;
        self.enqueue(prepared)
    }

    pub fn remove_by_id<T: Entity>(&mut self, id: impl Into<Id>) -> Result<()> {
        self.ensure_accumulating()?;
        let meta = EntityMeta::for_type::<T>()?;
        let key = meta.bind_key(id.into())?;
        let prepared =
            self.manager
                .prepare_remove(meta, key, &Options::none(), self.flush.batch_level())?;
        self.enqueue(prepared)
    }

    /// Reads go straight to the store, at the batch level when one is set.
    pub async fn find<T: Entity>(&self, id: impl Into<Id>) -> Result<Option<EntityProxy<T>>> {
        let context = self.manager.context::<T>()?;
        let key = context.meta().bind_key(id.into())?;
        context.find(&key, self.flush.batch_level()).await
    }

    /// Executes every queued statement in one request. The batch is back to
    /// clean afterwards, whatever the outcome.
    pub async fn end_batch(&mut self) -> Result<()> {
        let store = self.manager.store().clone();
        self.flush.end_batch(store.as_ref()).await?;
        Ok(())
    }

    /// Like `end_batch`, but returns at once. The batch is clean as soon as
    /// this returns.
    pub fn end_batch_async(&mut self, callbacks: Callbacks<Empty>) -> ResultHandle<Empty> {
        let request = match self.flush.detach() {
            Ok(request) => request,
            Err(err) => return ResultHandle::failed(err, &callbacks),
        };
        let store = self.manager.store().clone();
        ResultHandle::spawn(
            async move {
                let Some(request) = request else {
                    return Ok(Empty);
                };
                let span = info_span!(
                    "mapper.batch.flush",
                    statements = request.statements.len(),
                    consistency = %request.consistency
                );
                store.execute(request).instrument(span).await?;
                Ok(Empty)
            },
            callbacks,
        )
    }

    /// Discards queued statements.
    pub fn clean_batch(&mut self) {
        self.flush.clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::core::Value;
    use crate::meta::fixtures::{User, user};
    use crate::store::InMemoryColumnStore;
    use std::sync::Arc;

    fn manager() -> (Arc<InMemoryColumnStore>, PersistenceManager) {
        let store = Arc::new(InMemoryColumnStore::new());
        let manager = PersistenceManager::new(store.clone(), MapperConfig::default());
        (store, manager)
    }

    #[tokio::test]
    async fn test_batch_needs_start() {
        let (_, manager) = manager();
        let mut batch = manager.create_batch();
        assert!(matches!(
            batch.insert(user(1, "John")),
            Err(MapperError::IllegalAccess(_))
        ));
    }

    #[tokio::test]
    async fn test_writes_are_deferred_until_end() {
        let (store, manager) = manager();
        let mut batch = manager.create_unordered_batch();
        batch.start_batch().unwrap();
        let mut proxy = batch.insert(user(1, "John")).unwrap();
        proxy.set("name", "Jane").unwrap();
        batch.update(&mut proxy).unwrap();
        assert!(!proxy.is_dirty());
        assert_eq!(batch.pending_len(), 2);
        assert!(store.journal().unwrap().is_empty());

        batch.end_batch().await.unwrap();
        assert_eq!(batch.state(), FlushState::Clean);
        assert_eq!(store.journal().unwrap().len(), 1);

        let found = manager.find::<User>(1).await.unwrap().unwrap();
        assert_eq!(found.target().name.as_deref(), Some("Jane"));
    }

    #[tokio::test]
    async fn test_call_level_and_cas_are_rejected() {
        let (_, manager) = manager();
        let mut batch = manager.create_batch();
        batch.start_batch().unwrap();

        let with_level = Options::builder().consistency(ConsistencyLevel::All).build();
        assert!(matches!(
            batch.insert_with(user(1, "John"), with_level),
            Err(MapperError::UnsupportedOperation(_))
        ));
        let with_cas = Options::builder().if_not_exists().build();
        assert!(matches!(
            batch.insert_with(user(1, "John"), with_cas),
            Err(MapperError::UnsupportedOperation(_))
        ));
        assert_eq!(batch.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_counters_are_not_batched() {
        let (_, manager) = manager();
        let mut batch = manager.create_batch();
        batch.start_batch().unwrap();
        let mut entity = user(1, "John");
        entity.visits = Some(3);
        assert!(matches!(
            batch.insert(entity),
            Err(MapperError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_batch_discards() {
        let (store, manager) = manager();
        let mut batch = manager.create_batch();
        batch.start_batch_with(ConsistencyLevel::Quorum).unwrap();
        batch.insert(user(1, "John")).unwrap();
        batch.clean_batch();

        assert_eq!(batch.pending_len(), 0);
        assert_eq!(batch.consistency_level(), ConsistencyLevel::One);
        batch.start_batch().unwrap();
        batch.end_batch().await.unwrap();
        assert!(store.journal().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_end_batch_async() {
        let (_, manager) = manager();
        let mut batch = manager.create_batch();
        batch.start_batch().unwrap();
        batch.remove_by_id::<User>(9).unwrap();
        batch.insert(user(2, "John")).unwrap();

        let handle = batch.end_batch_async(Vec::new());
        assert_eq!(batch.state(), FlushState::Clean);
        assert_eq!(handle.await.unwrap(), Empty);
        let found = manager.find::<User>(2).await.unwrap().unwrap();
        assert_eq!(found.target().id, 2);
        assert_eq!(
            found.primary_key().get("id"),
            Some(&Value::Integer(2))
        );
    }
}
