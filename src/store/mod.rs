// ============================================================================
// Column Store Collaborator
// ============================================================================
//
// The mapper never talks to a database directly; it hands bound statements
// and read requests to a `ColumnStore`. `InMemoryColumnStore` is the bundled
// implementation with last-write-wins cells, collection deltas, counters and
// conditional writes.
//
// ============================================================================

pub mod memory;
pub mod slice;

pub use memory::InMemoryColumnStore;
pub use slice::{BoundingMode, OrderingMode, SliceQuery};

use crate::core::{ConsistencyLevel, Result, Row};
use crate::meta::PrimaryKeyValue;
use crate::statement::BoundStatement;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchType {
    /// All statements apply or none do.
    Logged,
    Unlogged,
}

/// One round-trip to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub statements: Vec<BoundStatement>,
    pub consistency: ConsistencyLevel,
    /// `None` for a single statement outside any batch.
    pub batch: Option<BatchType>,
}

impl WriteRequest {
    pub fn single(statement: BoundStatement, consistency: ConsistencyLevel) -> Self {
        Self {
            statements: vec![statement],
            consistency,
            batch: None,
        }
    }

    pub fn batch(
        statements: Vec<BoundStatement>,
        consistency: ConsistencyLevel,
        batch: BatchType,
    ) -> Self {
        Self {
            statements,
            consistency,
            batch: Some(batch),
        }
    }
}

/// Per-statement answer of the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatementOutcome {
    pub applied: bool,
    /// Current row of a rejected conditional write.
    pub current_values: Option<Row>,
}

impl StatementOutcome {
    pub fn applied() -> Self {
        Self {
            applied: true,
            current_values: None,
        }
    }

    pub fn rejected(current_values: Option<Row>) -> Self {
        Self {
            applied: false,
            current_values,
        }
    }
}

#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Executes every statement of the request; one outcome per statement.
    async fn execute(&self, request: WriteRequest) -> Result<Vec<StatementOutcome>>;

    /// Reads the named columns of one row. The returned row carries the key
    /// columns plus every requested column, null when absent.
    async fn read_row(
        &self,
        table: &str,
        key: &PrimaryKeyValue,
        columns: &[String],
        consistency: ConsistencyLevel,
    ) -> Result<Option<Row>>;

    /// Reads the rows of one partition within clustering bounds.
    async fn read_slice(
        &self,
        table: &str,
        query: &SliceQuery,
        columns: &[String],
    ) -> Result<Vec<Row>>;

    async fn read_counter(
        &self,
        table: &str,
        key: &PrimaryKeyValue,
        column: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Option<i64>>;
}
