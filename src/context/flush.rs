// ============================================================================
// Flush Context (batching)
// ============================================================================
//
// Accumulates statements between `start_batch` and `end_batch` and sends them
// as one atomic write request. The context always returns to `Clean` after a
// flush, whatever the outcome, so a failed batch can be rebuilt and retried.
//
// ============================================================================

use super::TimestampGenerator;
use crate::core::{ConsistencyLevel, MapperError, Result};
use crate::statement::BoundStatement;
use crate::store::{BatchType, ColumnStore, StatementOutcome, WriteRequest};
use log::debug;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

/// Lifecycle of a flush context.
///
/// ```text
/// Clean ──start_batch──> Accumulating ──end_batch──> Flushing ──> Clean
///                                                       │
///                                                       └──error──> Failed ──> Clean
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Clean,
    Accumulating,
    Flushing,
    Failed,
}

impl fmt::Display for FlushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushState::Clean => write!(f, "CLEAN"),
            FlushState::Accumulating => write!(f, "ACCUMULATING"),
            FlushState::Flushing => write!(f, "FLUSHING"),
            FlushState::Failed => write!(f, "FAILED"),
        }
    }
}

/// How statements of one batch are ordered against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchOrdering {
    /// Stamped at enqueue time from the context's generator.
    Ordered,
    /// Stamped with consecutive timestamps when the batch is flushed.
    #[default]
    Unordered,
}

pub struct FlushContext {
    state: FlushState,
    ordering: BatchOrdering,
    batch_type: BatchType,
    default_level: ConsistencyLevel,
    batch_level: Option<ConsistencyLevel>,
    statement_level: Option<ConsistencyLevel>,
    pending: Vec<BoundStatement>,
    timestamps: Arc<TimestampGenerator>,
}

impl FlushContext {
    pub fn new(
        ordering: BatchOrdering,
        default_level: ConsistencyLevel,
        timestamps: Arc<TimestampGenerator>,
    ) -> Self {
        Self {
            state: FlushState::Clean,
            ordering,
            batch_type: BatchType::Logged,
            default_level,
            batch_level: None,
            statement_level: None,
            pending: Vec::new(),
            timestamps,
        }
    }

    pub fn with_batch_type(mut self, batch_type: BatchType) -> Self {
        self.batch_type = batch_type;
        self
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub fn ordering(&self) -> BatchOrdering {
        self.ordering
    }

    pub fn batch_type(&self) -> BatchType {
        self.batch_type
    }

    pub fn is_accumulating(&self) -> bool {
        self.state == FlushState::Accumulating
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &[BoundStatement] {
        &self.pending
    }

    pub fn batch_level(&self) -> Option<ConsistencyLevel> {
        self.batch_level
    }

    /// Level the batch would flush at right now.
    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.batch_level
            .or(self.statement_level)
            .unwrap_or(self.default_level)
    }

    pub fn start_batch(&mut self, level: Option<ConsistencyLevel>) -> Result<()> {
        if self.state != FlushState::Clean {
            return Err(MapperError::IllegalAccess(format!(
                "cannot start a batch while the context is {}",
                self.state
            )));
        }
        self.state = FlushState::Accumulating;
        self.batch_level = level;
        debug!("batch started, ordering {:?}, level {:?}", self.ordering, level);
        Ok(())
    }

    /// Queues a statement resolved at `level`; without a batch level the
    /// batch flushes at the strictest level queued.
    pub fn enqueue(&mut self, mut statement: BoundStatement, level: ConsistencyLevel) -> Result<()> {
        if self.state != FlushState::Accumulating {
            return Err(MapperError::IllegalAccess(
                "no batch in progress, call start_batch() first".to_string(),
            ));
        }
        if self.ordering == BatchOrdering::Ordered && statement.timestamp.is_none() {
            statement.timestamp = Some(self.timestamps.next());
        }
        self.statement_level = Some(match self.statement_level {
            Some(current) => current.stronger(level),
            None => level,
        });
        self.pending.push(statement);
        Ok(())
    }

    fn build_request(&mut self) -> Option<WriteRequest> {
        if self.pending.is_empty() {
            return None;
        }
        let consistency = self.consistency_level();
        let mut statements = std::mem::take(&mut self.pending);

        if self.ordering == BatchOrdering::Unordered {
            let unstamped = statements.iter().filter(|s| s.timestamp.is_none()).count();
            let mut next = self.timestamps.next_range(unstamped);
            for statement in statements.iter_mut().filter(|s| s.timestamp.is_none()) {
                statement.timestamp = Some(next);
                next += 1;
            }
        }

        Some(WriteRequest::batch(statements, consistency, self.batch_type))
    }

    /// Flushes every queued statement as one request, then resets.
    pub async fn end_batch(&mut self, store: &dyn ColumnStore) -> Result<Vec<StatementOutcome>> {
        if self.state != FlushState::Accumulating {
            self.reset();
            return Err(MapperError::IllegalAccess(
                "no batch in progress, call start_batch() first".to_string(),
            ));
        }
        self.state = FlushState::Flushing;

        let Some(request) = self.build_request() else {
            self.reset();
            return Ok(Vec::new());
        };

        let span = info_span!(
            "mapper.batch.flush",
            statements = request.statements.len(),
            consistency = %request.consistency
        );
        let result = store.execute(request).instrument(span).await;

        if let Err(err) = &result {
            self.state = FlushState::Failed;
            event!(Level::ERROR, error = %err, "batch flush failed");
        }
        self.reset();
        result
    }

    /// Takes the queued statements as a request for execution elsewhere and
    /// resets immediately.
    pub fn detach(&mut self) -> Result<Option<WriteRequest>> {
        if self.state != FlushState::Accumulating {
            self.reset();
            return Err(MapperError::IllegalAccess(
                "no batch in progress, call start_batch() first".to_string(),
            ));
        }
        self.state = FlushState::Flushing;
        let request = self.build_request();
        self.reset();
        Ok(request)
    }

    /// Drops queued statements without executing them.
    pub fn clean(&mut self) {
        if !self.pending.is_empty() {
            debug!("batch cleaned, {} statement(s) discarded", self.pending.len());
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.batch_level = None;
        self.statement_level = None;
        self.state = FlushState::Clean;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::meta::PrimaryKeyValue;
    use crate::statement::Statement;
    use crate::store::InMemoryColumnStore;

    fn insert(id: i64, name: &str) -> BoundStatement {
        BoundStatement::new(Statement::Insert {
            table: "users".to_string(),
            key: PrimaryKeyValue::simple("id", Value::from(id)),
            columns: vec![("name".to_string(), Value::from(name))],
        })
    }

    fn context(ordering: BatchOrdering) -> FlushContext {
        FlushContext::new(
            ordering,
            ConsistencyLevel::One,
            Arc::new(TimestampGenerator::new()),
        )
    }

    #[test]
    fn test_enqueue_requires_batch() {
        let mut flush = context(BatchOrdering::Unordered);
        assert!(flush.enqueue(insert(1, "a"), ConsistencyLevel::One).is_err());

        flush.start_batch(None).unwrap();
        assert!(flush.start_batch(None).is_err());
        flush.enqueue(insert(1, "a"), ConsistencyLevel::One).unwrap();
        assert_eq!(flush.pending_len(), 1);
        assert_eq!(flush.state(), FlushState::Accumulating);
    }

    #[test]
    fn test_ordered_stamps_at_enqueue() {
        let mut flush = context(BatchOrdering::Ordered);
        flush.start_batch(None).unwrap();
        flush.enqueue(insert(1, "a"), ConsistencyLevel::One).unwrap();
        flush.enqueue(insert(1, "b"), ConsistencyLevel::One).unwrap();

        let first = flush.pending()[0].timestamp.unwrap();
        let second = flush.pending()[1].timestamp.unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_unordered_stamps_at_flush() {
        let mut flush = context(BatchOrdering::Unordered);
        flush.start_batch(None).unwrap();
        flush.enqueue(insert(1, "a"), ConsistencyLevel::One).unwrap();
        flush
            .enqueue(insert(1, "b").with_timestamp(Some(7)), ConsistencyLevel::One)
            .unwrap();
        flush.enqueue(insert(1, "c"), ConsistencyLevel::One).unwrap();
        assert!(flush.pending()[0].timestamp.is_none());

        let request = flush.detach().unwrap().unwrap();
        let stamps = request
            .statements
            .iter()
            .map(|s| s.timestamp.unwrap())
            .collect::<Vec<_>>();
        assert_eq!(stamps[1], 7);
        assert_eq!(stamps[2], stamps[0] + 1);
        assert_eq!(flush.state(), FlushState::Clean);
    }

    #[test]
    fn test_level_resolution() {
        let mut flush = context(BatchOrdering::Unordered);
        flush.start_batch(None).unwrap();
        flush.enqueue(insert(1, "a"), ConsistencyLevel::One).unwrap();
        flush.enqueue(insert(2, "b"), ConsistencyLevel::Quorum).unwrap();
        assert_eq!(flush.consistency_level(), ConsistencyLevel::Quorum);
        flush.clean();
        assert_eq!(flush.consistency_level(), ConsistencyLevel::One);

        flush.start_batch(Some(ConsistencyLevel::Two)).unwrap();
        flush.enqueue(insert(1, "a"), ConsistencyLevel::Quorum).unwrap();
        assert_eq!(flush.consistency_level(), ConsistencyLevel::Two);
    }

    #[tokio::test]
    async fn test_reset_after_success_and_failure() {
        let store = InMemoryColumnStore::new().with_replication_factor(3);
        let mut flush = context(BatchOrdering::Unordered);

        flush.start_batch(Some(ConsistencyLevel::Quorum)).unwrap();
        flush.enqueue(insert(1, "a"), ConsistencyLevel::One).unwrap();
        let outcomes = flush.end_batch(&store).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(flush.pending_len(), 0);
        assert_eq!(flush.consistency_level(), ConsistencyLevel::One);

        store.set_alive_replicas(1);
        flush.start_batch(Some(ConsistencyLevel::All)).unwrap();
        flush.enqueue(insert(2, "b"), ConsistencyLevel::One).unwrap();
        assert!(flush.end_batch(&store).await.is_err());
        assert_eq!(flush.state(), FlushState::Clean);
        assert_eq!(flush.pending_len(), 0);
        assert_eq!(flush.consistency_level(), ConsistencyLevel::One);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let store = InMemoryColumnStore::new();
        let mut flush = context(BatchOrdering::Ordered);
        flush.start_batch(None).unwrap();
        assert!(flush.end_batch(&store).await.unwrap().is_empty());
        assert!(store.journal().unwrap().is_empty());
    }
}
