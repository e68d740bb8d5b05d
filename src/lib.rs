// ============================================================================
// cfmapper Library
// ============================================================================
//
// Object mapping runtime for column-family stores: managed entity proxies
// with lazy loading and dirty tracking, tracked collections, counters,
// client-side batches, consistency resolution and lightweight transactions.
//
// ============================================================================

extern crate self as cfmapper;

pub mod blocking;
pub mod cas;
pub mod config;
pub mod context;
pub mod core;
pub mod future;
pub mod manager;
pub mod meta;
pub mod proxy;
pub mod statement;
pub mod store;
pub mod wrapper;

// Re-export main types for convenience
pub use core::{AccessKind, ColumnValue, ConsistencyLevel, MapperError, Result, Value};
pub use config::{InsertStrategy, MapperConfig};
pub use meta::{
    CollectionType, Entity, EntityMeta, Id, PrimaryKeyValue, PropertyKind, PropertySpec,
    unknown_property,
};
pub use cfmapper_derive::Entity;

pub use cas::{CasCondition, CasError, CasMode, CasOperation, CasOperator, CasResult};
pub use cas::CasResultListener;
pub use context::{BatchOrdering, FlushState};
pub use future::{Empty, FutureCallback, ResultHandle};
pub use manager::{Batch, ConstraintViolation, Options, PersistenceManager, SliceQueryBuilder};
pub use proxy::{CounterHandle, EntityProxy};
pub use store::{BoundingMode, ColumnStore, InMemoryColumnStore, OrderingMode};
pub use wrapper::{CollectionOp, ListWrapper, MapWrapper, SetWrapper};
pub use blocking::{BlockingBatch, BlockingManager};
