// ============================================================================
// Persistence Manager
// ============================================================================
//
// Caller-facing entry point: CRUD over managed entities, batches, slice
// queries and their `*_async` counterparts.
//
// Writes are built from entity metadata and, for updates, from the proxy's
// dirty state. Consistency is resolved per call (call > batch > field >
// class > configured default) and never remembered afterwards. Conditional
// writes either fail with `CasRejected` or report to the call's listener.
//
// ============================================================================

pub mod batch;
pub mod options;
pub mod slice;
pub mod validation;

pub use batch::Batch;
pub use options::{Options, OptionsBuilder};
pub use slice::SliceQueryBuilder;
pub use validation::ConstraintViolation;

use crate::cas::{CasOperation, interpret_outcome};
use crate::config::MapperConfig;
use crate::context::{
    BatchOrdering, ConsistencyResolver, PersistenceContext, TimestampGenerator,
};
use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result};
use crate::future::{Callbacks, Empty, ResultHandle};
use crate::meta::{Entity, EntityMeta, Id, PrimaryKeyValue};
use crate::proxy::EntityProxy;
use crate::statement::{BoundStatement, Statement, builder};
use crate::store::{ColumnStore, WriteRequest};
use log::debug;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// State shared by a manager, its clones and every context it hands out.
pub(crate) struct ManagerShared {
    pub(crate) store: Arc<dyn ColumnStore>,
    pub(crate) config: MapperConfig,
    pub(crate) resolver: ConsistencyResolver,
    pub(crate) timestamps: Arc<TimestampGenerator>,
}

/// A write ready to execute or to queue in a batch.
pub(crate) struct PreparedWrite {
    pub(crate) context: PersistenceContext,
    pub(crate) key: PrimaryKeyValue,
    pub(crate) statement: BoundStatement,
    pub(crate) level: ConsistencyLevel,
    /// Counter increments, applied only once the row write succeeded.
    pub(crate) counters: Vec<(BoundStatement, ConsistencyLevel)>,
}

fn bind(statement: Statement, options: &Options) -> BoundStatement {
    BoundStatement::new(statement)
        .with_ttl(options.ttl())
        .with_timestamp(options.timestamp())
        .with_condition(options.condition().cloned())
}

/// Entry point for managed entities. Cheap to clone; clones share the store
/// and configuration.
///
/// # Examples
///
/// ```
/// use cfmapper::{Entity, InMemoryColumnStore, MapperConfig, PersistenceManager};
/// use std::sync::Arc;
///
/// #[derive(Debug, Default, Entity)]
/// #[entity(table = "users")]
/// struct User {
///     #[id]
///     id: i64,
///     name: Option<String>,
/// }
///
/// # tokio_test::block_on(async {
/// let manager = PersistenceManager::new(
///     Arc::new(InMemoryColumnStore::new()),
///     MapperConfig::default(),
/// );
/// let mut user = manager
///     .insert(User { id: 1, name: Some("John".into()) })
///     .await?;
/// user.set("name", "Jane")?;
/// manager.update(&mut user).await?;
///
/// let found = manager.find::<User>(1).await?.expect("stored");
/// assert_eq!(found.target().name.as_deref(), Some("Jane"));
/// # Ok::<(), cfmapper::MapperError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct PersistenceManager {
    shared: Arc<ManagerShared>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("config", &self.shared.config)
            .finish()
    }
}

impl PersistenceManager {
    pub fn new(store: Arc<dyn ColumnStore>, config: MapperConfig) -> Self {
        let shared = ManagerShared {
            store,
            resolver: ConsistencyResolver::new(config.clone()),
            config,
            timestamps: Arc::new(TimestampGenerator::new()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.shared.config
    }

    pub fn store(&self) -> &Arc<dyn ColumnStore> {
        &self.shared.store
    }

    pub fn resolver(&self) -> &ConsistencyResolver {
        &self.shared.resolver
    }

    pub(crate) fn shared(&self) -> &Arc<ManagerShared> {
        &self.shared
    }

    /// Context for entities of type `T`, bound to this manager.
    pub fn context<T: Entity>(&self) -> Result<PersistenceContext> {
        Ok(PersistenceContext::new(
            &self.shared,
            EntityMeta::for_type::<T>()?,
        ))
    }

    fn validate<T: Entity>(&self, entity: &T) -> Result<()> {
        if self.shared.config.bean_validation {
            validation::check(entity)?;
        }
        Ok(())
    }

    pub(crate) fn prepare_insert<T: Entity>(
        &self,
        entity: &T,
        options: &Options,
        batch: Option<ConsistencyLevel>,
    ) -> Result<PreparedWrite> {
        self.validate(entity)?;
        let context = self.context::<T>()?;
        let meta = context.meta().clone();
        let key = builder::key_of(&meta, entity)?;
        let strategy = meta
            .insert_strategy()
            .unwrap_or(self.shared.config.insert_strategy);
        let plan = builder::insert(&meta, entity, &key, strategy)?;
        builder::check_condition(CasOperation::Insert, options.condition())?;

        let resolver = &self.shared.resolver;
        let field = ConsistencyResolver::strongest_field_level(
            meta.properties().iter().filter(|p| !p.kind().is_counter()),
            AccessKind::Write,
        );
        let level = resolver.resolve(&meta, field, AccessKind::Write, options.consistency(), batch);

        let counters = plan
            .counters
            .into_iter()
            .map(|statement| {
                let field = match &statement {
                    Statement::CounterIncrement { column, .. } => meta
                        .properties()
                        .iter()
                        .find(|p| p.column() == column)
                        .and_then(|p| ConsistencyResolver::field_level(p, AccessKind::Write)),
                    _ => None,
                };
                let level = resolver.resolve(&meta, field, AccessKind::Write, None, batch);
                (BoundStatement::new(statement), level)
            })
            .collect();

        Ok(PreparedWrite {
            context,
            key,
            statement: bind(plan.statement, options),
            level,
            counters,
        })
    }

    /// `None` when the proxy has nothing to write.
    pub(crate) fn prepare_update<T: Entity>(
        &self,
        proxy: &EntityProxy<T>,
        options: &Options,
        batch: Option<ConsistencyLevel>,
    ) -> Result<Option<PreparedWrite>> {
        let state = proxy.state();
        self.validate(&state.target)?;
        let meta = state.meta().clone();
        let dirty = state.dirty_properties();
        let Some(statement) =
            builder::update(&meta, state.primary_key(), &state.target, &dirty, &state.slots)?
        else {
            return Ok(None);
        };
        builder::check_condition(CasOperation::Update, options.condition())?;

        let field = ConsistencyResolver::strongest_field_level(dirty, AccessKind::Write);
        let level = self.shared.resolver.resolve(
            &meta,
            field,
            AccessKind::Write,
            options.consistency(),
            batch,
        );
        Ok(Some(PreparedWrite {
            context: PersistenceContext::new(&self.shared, meta),
            key: state.primary_key().clone(),
            statement: bind(statement, options),
            level,
            counters: Vec::new(),
        }))
    }

    pub(crate) fn prepare_remove(
        &self,
        meta: Arc<EntityMeta>,
        key: PrimaryKeyValue,
        options: &Options,
        batch: Option<ConsistencyLevel>,
    ) -> Result<PreparedWrite> {
        builder::check_condition(CasOperation::Delete, options.condition())?;
        let statement = builder::delete(&meta, &key);
        let level = self.shared.resolver.resolve(
            &meta,
            None,
            AccessKind::Write,
            options.consistency(),
            batch,
        );
        Ok(PreparedWrite {
            context: PersistenceContext::new(&self.shared, meta),
            key,
            statement: bind(statement, options),
            level,
            counters: Vec::new(),
        })
    }

    /// Runs one statement; returns whether it was applied.
    async fn execute_write(
        &self,
        operation: CasOperation,
        statement: BoundStatement,
        level: ConsistencyLevel,
        options: &Options,
    ) -> Result<bool> {
        let conditional = statement.is_conditional();
        let outcomes = match self
            .shared
            .store
            .execute(WriteRequest::single(statement, level))
            .await
        {
            Ok(outcomes) => outcomes,
            Err(err) => {
                event!(Level::ERROR, error = %err, "mapper write failed");
                return Err(err);
            }
        };
        if !conditional {
            return Ok(true);
        }
        let outcome = outcomes.into_iter().next().unwrap_or_default();
        let result = interpret_outcome(operation, outcome, options.cas_listener())?;
        Ok(result.applied)
    }

    async fn apply_counters(&self, counters: Vec<(BoundStatement, ConsistencyLevel)>) -> Result<()> {
        for (statement, level) in counters {
            self.shared
                .store
                .execute(WriteRequest::single(statement, level))
                .await?;
        }
        Ok(())
    }

    pub async fn insert<T: Entity>(&self, entity: T) -> Result<EntityProxy<T>> {
        self.insert_with(entity, Options::none()).await
    }

    /// Writes a new entity and returns it managed. With a CAS listener a
    /// rejected insert still returns the proxy of the entity as given.
    pub async fn insert_with<T: Entity>(&self, entity: T, options: Options) -> Result<EntityProxy<T>> {
        let prepared = self.prepare_insert(&entity, &options, None)?;
        let span = info_span!(
            "mapper.entity.insert",
            entity_type = %prepared.context.meta().type_name(),
            key = %prepared.key,
            consistency = %prepared.level
        );
        let applied = self
            .execute_write(CasOperation::Insert, prepared.statement, prepared.level, &options)
            .instrument(span)
            .await?;
        if applied {
            self.apply_counters(prepared.counters).await?;
        }

        let mut proxy = prepared.context.build_proxy(entity, prepared.key);
        proxy.state_mut().mark_all_loaded();
        Ok(proxy)
    }

    pub async fn update<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.update_with(proxy, Options::none()).await
    }

    /// Writes the dirty properties of `proxy`. Dirty state is cleared only
    /// when the write was applied.
    pub async fn update_with<T: Entity>(
        &self,
        proxy: &mut EntityProxy<T>,
        options: Options,
    ) -> Result<()> {
        let Some(prepared) = self.prepare_update(proxy, &options, None)? else {
            debug!(
                "{} {} has no changes to update",
                proxy.meta().type_name(),
                proxy.primary_key()
            );
            return Ok(());
        };
        let span = info_span!(
            "mapper.entity.update",
            entity_type = %prepared.context.meta().type_name(),
            key = %prepared.key,
            consistency = %prepared.level
        );
        let applied = self
            .execute_write(CasOperation::Update, prepared.statement, prepared.level, &options)
            .instrument(span)
            .await?;
        if applied {
            proxy.state_mut().reset_dirty();
        }
        Ok(())
    }

    pub async fn remove<T: Entity>(&self, proxy: &EntityProxy<T>) -> Result<()> {
        self.remove_with(proxy, Options::none()).await
    }

    pub async fn remove_with<T: Entity>(&self, proxy: &EntityProxy<T>, options: Options) -> Result<()> {
        self.remove_key(proxy.meta().clone(), proxy.primary_key().clone(), options)
            .await
    }

    /// Deletes by primary key without loading the entity.
    pub async fn remove_by_id<T: Entity>(&self, id: impl Into<Id>) -> Result<()> {
        self.remove_by_id_with::<T>(id, Options::none()).await
    }

    pub async fn remove_by_id_with<T: Entity>(
        &self,
        id: impl Into<Id>,
        options: Options,
    ) -> Result<()> {
        let meta = EntityMeta::for_type::<T>()?;
        let key = meta.bind_key(id.into())?;
        self.remove_key(meta, key, options).await
    }

    async fn remove_key(
        &self,
        meta: Arc<EntityMeta>,
        key: PrimaryKeyValue,
        options: Options,
    ) -> Result<()> {
        let prepared = self.prepare_remove(meta, key, &options, None)?;
        let span = info_span!(
            "mapper.entity.remove",
            entity_type = %prepared.context.meta().type_name(),
            key = %prepared.key,
            consistency = %prepared.level
        );
        self.execute_write(CasOperation::Delete, prepared.statement, prepared.level, &options)
            .instrument(span)
            .await?;
        Ok(())
    }

    pub async fn find<T: Entity>(&self, id: impl Into<Id>) -> Result<Option<EntityProxy<T>>> {
        self.find_with(id, Options::none()).await
    }

    /// Reads an entity; only the consistency of `options` applies.
    pub async fn find_with<T: Entity>(
        &self,
        id: impl Into<Id>,
        options: Options,
    ) -> Result<Option<EntityProxy<T>>> {
        let context = self.context::<T>()?;
        let key = context.meta().bind_key(id.into())?;
        context.find(&key, options.consistency()).await
    }

    /// Proxy for a known key, built without reading the row. Only what is set
    /// on it is written by a later update.
    pub fn get_proxy<T: Entity>(&self, id: impl Into<Id>) -> Result<EntityProxy<T>> {
        let context = self.context::<T>()?;
        let meta = context.meta().clone();
        let key = meta.bind_key(id.into())?;
        let mut target = T::default();
        for (component, (_, value)) in meta.primary_key().components().iter().zip(key.components()) {
            target.set_raw(component.name(), value.clone())?;
        }
        Ok(context.build_proxy(target, key))
    }

    pub async fn refresh<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        self.refresh_with(proxy, Options::none()).await
    }

    /// Re-reads the eager columns and drops every pending change. Lazy
    /// properties load again on next access.
    pub async fn refresh_with<T: Entity>(
        &self,
        proxy: &mut EntityProxy<T>,
        options: Options,
    ) -> Result<()> {
        let meta = proxy.meta().clone();
        let key = proxy.primary_key().clone();
        let level = self.shared.resolver.resolve(
            &meta,
            None,
            AccessKind::Read,
            options.consistency(),
            None,
        );
        let span = info_span!(
            "mapper.entity.refresh",
            entity_type = %meta.type_name(),
            key = %key,
            consistency = %level
        );
        let row = self
            .shared
            .store
            .read_row(meta.table(), &key, &meta.eager_columns(), level)
            .instrument(span)
            .await?;
        let Some(row) = row else {
            return Err(MapperError::StaleObject(format!(
                "{} with key {} no longer exists",
                meta.type_name(),
                key
            )));
        };

        let state = proxy.state_mut();
        state.context.fill_eager(&mut state.target, &row)?;
        state.already_loaded.clear();
        state.reset_dirty();
        Ok(())
    }

    /// Loads every lazy property of `proxy` in one read.
    pub async fn initialize<T: Entity>(&self, proxy: &mut EntityProxy<T>) -> Result<()> {
        proxy.initialize().await
    }

    pub fn slice_query<T: Entity>(&self) -> Result<SliceQueryBuilder<T>> {
        Ok(SliceQueryBuilder::new(self.context::<T>()?))
    }

    /// New batch, ordered when the configuration asks for it.
    pub fn create_batch(&self) -> Batch {
        let ordering = if self.shared.config.ordered_batches {
            BatchOrdering::Ordered
        } else {
            BatchOrdering::Unordered
        };
        Batch::new(self.clone(), ordering)
    }

    pub fn create_ordered_batch(&self) -> Batch {
        Batch::new(self.clone(), BatchOrdering::Ordered)
    }

    pub fn create_unordered_batch(&self) -> Batch {
        Batch::new(self.clone(), BatchOrdering::Unordered)
    }

    pub fn insert_async<T: Entity>(
        &self,
        entity: T,
        options: Options,
        callbacks: Callbacks<EntityProxy<T>>,
    ) -> ResultHandle<EntityProxy<T>> {
        let manager = self.clone();
        ResultHandle::spawn(
            async move { manager.insert_with(entity, options).await },
            callbacks,
        )
    }

    /// Takes the proxy and hands it back once written.
    pub fn update_async<T: Entity>(
        &self,
        mut proxy: EntityProxy<T>,
        options: Options,
        callbacks: Callbacks<EntityProxy<T>>,
    ) -> ResultHandle<EntityProxy<T>> {
        let manager = self.clone();
        ResultHandle::spawn(
            async move {
                manager.update_with(&mut proxy, options).await?;
                Ok(proxy)
            },
            callbacks,
        )
    }

    pub fn remove_async<T: Entity>(
        &self,
        proxy: &EntityProxy<T>,
        options: Options,
        callbacks: Callbacks<Empty>,
    ) -> ResultHandle<Empty> {
        let manager = self.clone();
        let meta = proxy.meta().clone();
        let key = proxy.primary_key().clone();
        ResultHandle::spawn(
            async move {
                manager.remove_key(meta, key, options).await?;
                Ok(Empty)
            },
            callbacks,
        )
    }

    pub fn remove_by_id_async<T: Entity>(
        &self,
        id: impl Into<Id>,
        options: Options,
        callbacks: Callbacks<Empty>,
    ) -> ResultHandle<Empty> {
        let manager = self.clone();
        let id = id.into();
        ResultHandle::spawn(
            async move {
                manager.remove_by_id_with::<T>(id, options).await?;
                Ok(Empty)
            },
            callbacks,
        )
    }

    pub fn find_async<T: Entity>(
        &self,
        id: impl Into<Id>,
        options: Options,
        callbacks: Callbacks<Option<EntityProxy<T>>>,
    ) -> ResultHandle<Option<EntityProxy<T>>> {
        let manager = self.clone();
        let id = id.into();
        ResultHandle::spawn(
            async move { manager.find_with::<T>(id, options).await },
            callbacks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::CasCondition;
    use crate::meta::fixtures::{User, user};
    use crate::store::InMemoryColumnStore;
    use crate::wrapper::CollectionOp;
    use crate::core::Value;

    fn manager() -> (Arc<InMemoryColumnStore>, PersistenceManager) {
        let store = Arc::new(InMemoryColumnStore::new());
        let manager = PersistenceManager::new(store.clone(), MapperConfig::default());
        (store, manager)
    }

    #[tokio::test]
    async fn test_insert_then_find() {
        let (_, manager) = manager();
        let mut entity = user(10, "John");
        entity.tags = vec!["a".to_string(), "b".to_string()];
        manager.insert(entity.clone()).await.unwrap();

        let mut found = manager.find::<User>(10).await.unwrap().unwrap();
        assert_eq!(found.target().name, entity.name);
        assert_eq!(found.target().tags, entity.tags);
        assert_eq!(found.get("id").await.unwrap(), Value::Integer(10));
        assert!(!found.is_dirty());
    }

    #[tokio::test]
    async fn test_update_writes_only_dirty_columns() {
        let (store, manager) = manager();
        let mut proxy = manager.insert(user(1, "John")).await.unwrap();
        proxy.set("name", "Jane").unwrap();
        manager.update(&mut proxy).await.unwrap();
        assert!(!proxy.is_dirty());

        let journal = store.journal().unwrap();
        let last = journal.last().unwrap();
        match &last.statements[0].statement {
            Statement::Update { ops, .. } => assert_eq!(ops.len(), 1),
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clean_update_skips_store() {
        let (store, manager) = manager();
        let mut proxy = manager.insert(user(1, "John")).await.unwrap();
        let before = store.journal().unwrap().len();
        manager.update(&mut proxy).await.unwrap();
        assert_eq!(store.journal().unwrap().len(), before);
    }

    #[tokio::test]
    async fn test_rejected_update_keeps_changes() {
        let (_, manager) = manager();
        let mut proxy = manager.insert(user(1, "John")).await.unwrap();
        proxy.set("name", "Jane").unwrap();
        let options = Options::builder()
            .condition(CasCondition::eq("name", "Bob"))
            .build();

        let err = manager.update_with(&mut proxy, options).await.unwrap_err();
        assert!(matches!(err, MapperError::CasRejected(_)));
        assert!(proxy.is_dirty());
    }

    #[tokio::test]
    async fn test_remove_then_refresh_is_stale() {
        let (_, manager) = manager();
        let mut proxy = manager.insert(user(3, "John")).await.unwrap();
        manager.remove(&proxy).await.unwrap();

        assert!(manager.find::<User>(3).await.unwrap().is_none());
        let err = manager.refresh(&mut proxy).await.unwrap_err();
        assert!(matches!(err, MapperError::StaleObject(_)));
    }

    #[tokio::test]
    async fn test_refresh_discards_pending_changes() {
        let (_, manager) = manager();
        let mut proxy = manager.insert(user(4, "John")).await.unwrap();
        proxy.set("name", "Jane").unwrap();
        {
            let mut tags = proxy.list_wrapper("tags").await.unwrap().unwrap();
            tags.push("x").unwrap();
        }
        manager.refresh(&mut proxy).await.unwrap();

        assert_eq!(proxy.target().name.as_deref(), Some("John"));
        assert!(proxy.target().tags.is_empty());
        assert!(!proxy.is_dirty());
        assert!(proxy.pending_ops("tags").unwrap().is_empty());
        assert!(!proxy.is_loaded("bio").unwrap());
    }

    #[tokio::test]
    async fn test_get_proxy_updates_without_reading() {
        let (store, manager) = manager();
        manager.insert(user(5, "John")).await.unwrap();
        let reads = store.read_count();

        let mut proxy = manager.get_proxy::<User>(5).unwrap();
        proxy.set("name", "Jane").unwrap();
        {
            let mut labels = proxy.set_wrapper("labels").await.unwrap().unwrap();
            labels.insert("vip").unwrap();
        }
        assert!(matches!(
            proxy.pending_ops("labels").unwrap()[0],
            CollectionOp::AddElements(_)
        ));
        manager.update(&mut proxy).await.unwrap();
        assert_eq!(store.read_count(), reads);

        let found = manager.find::<User>(5).await.unwrap().unwrap();
        assert_eq!(found.target().name.as_deref(), Some("Jane"));
        assert!(found.target().labels.contains("vip"));
    }

    #[tokio::test]
    async fn test_dropped_manager_closes_contexts() {
        let (_, manager) = manager();
        let mut proxy = manager.insert(user(6, "John")).await.unwrap();
        drop(manager);
        assert!(!proxy.state().context().is_open());
        assert!(matches!(
            proxy.counter("visits"),
            Err(MapperError::ContextClosed)
        ));
    }
}
