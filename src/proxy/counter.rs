use crate::context::PersistenceContext;
use crate::core::{ConsistencyLevel, Result};
use crate::meta::PrimaryKeyValue;
use crate::statement::{BoundStatement, Statement};
use crate::store::WriteRequest;
use tracing::{Instrument, info_span};

/// Handle on a distributed counter column.
///
/// Every call goes straight to the store; nothing is buffered in the entity
/// and nothing joins a batch.
#[derive(Debug)]
pub struct CounterHandle {
    context: PersistenceContext,
    key: PrimaryKeyValue,
    column: String,
    read_level: ConsistencyLevel,
    write_level: ConsistencyLevel,
}

impl CounterHandle {
    pub(crate) fn new(
        context: PersistenceContext,
        key: PrimaryKeyValue,
        column: &str,
        read_level: ConsistencyLevel,
        write_level: ConsistencyLevel,
    ) -> Self {
        Self {
            context,
            key,
            column: column.to_string(),
            read_level,
            write_level,
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn key(&self) -> &PrimaryKeyValue {
        &self.key
    }

    /// `None` when the counter was never incremented.
    pub async fn get(&self) -> Result<Option<i64>> {
        let shared = self.context.shared()?;
        shared
            .store
            .read_counter(self.context.meta().table(), &self.key, &self.column, self.read_level)
            .await
    }

    pub async fn incr(&self) -> Result<()> {
        self.incr_by(1).await
    }

    pub async fn incr_by(&self, delta: i64) -> Result<()> {
        let shared = self.context.shared()?;
        let statement = BoundStatement::new(Statement::CounterIncrement {
            table: self.context.meta().table().to_string(),
            key: self.key.clone(),
            column: self.column.clone(),
            delta,
        });
        let span = info_span!(
            "mapper.counter.incr",
            column = %self.column,
            key = %self.key,
            delta
        );
        shared
            .store
            .execute(WriteRequest::single(statement, self.write_level))
            .instrument(span)
            .await?;
        Ok(())
    }

    pub async fn decr(&self) -> Result<()> {
        self.incr_by(-1).await
    }

    pub async fn decr_by(&self, delta: i64) -> Result<()> {
        self.incr_by(-delta).await
    }
}
