use crate::context::PersistenceContext;
use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result, Value};
use crate::meta::Entity;
use crate::proxy::EntityProxy;
use crate::store::{BoundingMode, OrderingMode, SliceQuery};
use std::marker::PhantomData;
use tracing::{Instrument, info_span};

/// Range read over one partition of an entity with a clustered key.
///
/// ```ignore
/// let messages = manager
///     .slice_query::<Message>()?
///     .partition_components([user_id])
///     .from_clusterings([from_date])
///     .bounding(BoundingMode::InclusiveStartExclusiveEnd)
///     .ordering(OrderingMode::Descending)
///     .limit(20)
///     .get()
///     .await?;
/// ```
pub struct SliceQueryBuilder<T: Entity> {
    context: PersistenceContext,
    partition: Vec<Value>,
    from: Vec<Value>,
    to: Vec<Value>,
    bounding: BoundingMode,
    ordering: OrderingMode,
    limit: Option<usize>,
    consistency: Option<ConsistencyLevel>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> SliceQueryBuilder<T> {
    pub(crate) fn new(context: PersistenceContext) -> Self {
        Self {
            context,
            partition: Vec::new(),
            from: Vec::new(),
            to: Vec::new(),
            bounding: BoundingMode::default(),
            ordering: OrderingMode::default(),
            limit: None,
            consistency: None,
            _entity: PhantomData,
        }
    }

    pub fn partition_components<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.partition = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn from_clusterings<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.from = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_clusterings<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.to = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn bounding(mut self, bounding: BoundingMode) -> Self {
        self.bounding = bounding;
        self
    }

    pub fn ordering(mut self, ordering: OrderingMode) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    fn build(&self, level: ConsistencyLevel) -> Result<SliceQuery> {
        let meta = self.context.meta();
        let key = meta.primary_key();
        if !key.is_composite() {
            return Err(MapperError::UnsupportedOperation(format!(
                "slice queries need a clustered primary key, '{}' has a simple one",
                meta.type_name()
            )));
        }
        if self.partition.len() != key.partition_len() {
            return Err(MapperError::IllegalAccess(format!(
                "there should be exactly {} partition component(s) for '{}', got {}",
                key.partition_len(),
                meta.type_name(),
                self.partition.len()
            )));
        }
        let clustering_len = key.components().len() - key.partition_len();
        for (name, bound) in [("from", &self.from), ("to", &self.to)] {
            if bound.len() > clustering_len {
                return Err(MapperError::IllegalAccess(format!(
                    "'{}' bound has {} clustering component(s), '{}' declares {}",
                    name,
                    bound.len(),
                    meta.type_name(),
                    clustering_len
                )));
            }
        }

        let mut query = SliceQuery::new(self.partition.clone(), level);
        query.from = self.from.clone();
        query.to = self.to.clone();
        query.bounding = self.bounding;
        query.ordering = self.ordering;
        query.limit = self.limit;
        Ok(query)
    }

    /// Matching rows as managed entities, in clustering order.
    pub async fn get(self) -> Result<Vec<EntityProxy<T>>> {
        let shared = self.context.shared()?;
        let meta = self.context.meta().clone();
        let level = shared
            .resolver
            .resolve(&meta, None, AccessKind::Read, self.consistency, None);
        let query = self.build(level)?;

        let span = info_span!(
            "mapper.slice.get",
            entity_type = %meta.type_name(),
            consistency = %level,
            limit = ?query.limit
        );
        let rows = shared
            .store
            .read_slice(meta.table(), &query, &meta.eager_columns())
            .instrument(span)
            .await?;
        rows.iter().map(|row| self.context.materialize(row)).collect()
    }

    pub async fn get_first(self) -> Result<Option<EntityProxy<T>>> {
        Ok(self.limit(1).get().await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;
    use crate::manager::PersistenceManager;
    use crate::meta::fixtures::User;
    use crate::meta::{EntityMeta, unknown_property};
    use crate::core::ColumnValue;
    use crate::store::InMemoryColumnStore;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone)]
    struct Message {
        user_id: i64,
        sent_at: i64,
        body: String,
    }

    impl Entity for Message {
        fn entity_meta() -> Result<EntityMeta> {
            EntityMeta::builder("Message", "messages")
                .partition_key("user_id")
                .clustering_key("sent_at")
                .property("body", crate::meta::PropertyKind::Simple)
                .build()
        }

        fn get_raw(&self, property: &str) -> Result<Value> {
            Ok(match property {
                "user_id" => self.user_id.to_value(),
                "sent_at" => self.sent_at.to_value(),
                "body" => self.body.to_value(),
                other => return Err(unknown_property("Message", other)),
            })
        }

        fn set_raw(&mut self, property: &str, value: Value) -> Result<()> {
            match property {
                "user_id" => self.user_id = ColumnValue::from_value(value)?,
                "sent_at" => self.sent_at = ColumnValue::from_value(value)?,
                "body" => self.body = ColumnValue::from_value(value)?,
                other => return Err(unknown_property("Message", other)),
            }
            Ok(())
        }
    }

    async fn seeded() -> PersistenceManager {
        let manager = PersistenceManager::new(
            Arc::new(InMemoryColumnStore::new()),
            MapperConfig::default(),
        );
        for (user_id, sent_at) in [(1, 10), (1, 20), (1, 30), (2, 15)] {
            let message = Message {
                user_id,
                sent_at,
                body: format!("m{}", sent_at),
            };
            manager.insert(message).await.unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_slice_bounds_and_order() {
        let manager = seeded().await;
        let messages = manager
            .slice_query::<Message>()
            .unwrap()
            .partition_components([1])
            .from_clusterings([10])
            .to_clusterings([30])
            .bounding(BoundingMode::ExclusiveStartInclusiveEnd)
            .ordering(OrderingMode::Descending)
            .get()
            .await
            .unwrap();

        let sent = messages.iter().map(|m| m.target().sent_at).collect::<Vec<_>>();
        assert_eq!(sent, vec![30, 20]);
        assert!(messages.iter().all(|m| !m.is_dirty()));
    }

    #[tokio::test]
    async fn test_get_first() {
        let manager = seeded().await;
        let first = manager
            .slice_query::<Message>()
            .unwrap()
            .partition_components([1])
            .get_first()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.target().body, "m10");
    }

    #[tokio::test]
    async fn test_slice_shape_is_checked() {
        let manager = seeded().await;
        let err = manager
            .slice_query::<Message>()
            .unwrap()
            .get()
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::IllegalAccess(_)));

        let err = manager
            .slice_query::<User>()
            .unwrap()
            .partition_components([1])
            .get()
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::UnsupportedOperation(_)));
    }
}
