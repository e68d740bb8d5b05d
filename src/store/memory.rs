use super::{ColumnStore, SliceQuery, StatementOutcome, WriteRequest};
use crate::cas::CasMode;
use crate::context::TimestampGenerator;
use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result, Row, Value};
use crate::meta::PrimaryKeyValue;
use crate::statement::{BoundStatement, ColumnOp, Statement};
use crate::store::OrderingMode;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Cell {
    /// Null marks a deleted cell.
    value: Value,
    timestamp: i64,
    expires_at: Option<DateTime<Utc>>,
}

impl Cell {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.value.is_null() && self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone, Default)]
struct StoredRow {
    marker: Option<Cell>,
    deleted_at: Option<i64>,
    cells: BTreeMap<String, Cell>,
}

impl StoredRow {
    fn shadowed(&self, timestamp: i64) -> bool {
        self.deleted_at.is_some_and(|deleted| deleted >= timestamp)
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.marker.as_ref().is_some_and(|m| m.is_live(now))
            || self.cells.values().any(|cell| cell.is_live(now))
    }

    fn live_value(&self, column: &str, now: DateTime<Utc>) -> Option<&Value> {
        self.cells
            .get(column)
            .filter(|cell| cell.is_live(now))
            .map(|cell| &cell.value)
    }

    fn write(&mut self, column: &str, value: Value, timestamp: i64, expires_at: Option<DateTime<Utc>>) {
        if self.shadowed(timestamp) {
            return;
        }
        if self.cells.get(column).is_some_and(|existing| existing.timestamp > timestamp) {
            return;
        }
        let value = if value.is_null_or_empty() { Value::Null } else { value };
        self.cells.insert(
            column.to_string(),
            Cell {
                value,
                timestamp,
                expires_at,
            },
        );
    }

    fn merge(
        &mut self,
        column: &str,
        timestamp: i64,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        apply: impl FnOnce(Value) -> Result<Value>,
    ) -> Result<()> {
        if self.shadowed(timestamp) {
            return Ok(());
        }
        if self.cells.get(column).is_some_and(|existing| existing.timestamp > timestamp) {
            return Ok(());
        }
        let current = self.live_value(column, now).cloned().unwrap_or(Value::Null);
        let merged = apply(current)?;
        self.write(column, merged, timestamp, expires_at);
        Ok(())
    }

    fn delete(&mut self, timestamp: i64) {
        self.deleted_at = Some(self.deleted_at.map_or(timestamp, |d| d.max(timestamp)));
        self.cells.retain(|_, cell| cell.timestamp > timestamp);
        if self.marker.as_ref().is_some_and(|m| m.timestamp <= timestamp) {
            self.marker = None;
        }
    }

    fn to_row(&self, key: &PrimaryKeyValue, now: DateTime<Utc>) -> Row {
        let mut row: Row = key.components().iter().cloned().collect();
        for (column, cell) in &self.cells {
            if cell.is_live(now) {
                row.insert(column.clone(), cell.value.clone());
            }
        }
        row
    }
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    tables: HashMap<String, BTreeMap<PrimaryKeyValue, StoredRow>>,
    counters: HashMap<String, BTreeMap<PrimaryKeyValue, BTreeMap<String, i64>>>,
}

impl StoreData {
    fn live_row(&self, table: &str, key: &PrimaryKeyValue, now: DateTime<Utc>) -> Option<&StoredRow> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .filter(|row| row.is_live(now))
    }

    fn row_mut(&mut self, table: &str, key: &PrimaryKeyValue) -> &mut StoredRow {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(key.clone())
            .or_default()
    }
}

fn list_of(value: Value, column: &str) -> Result<Vec<Value>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items),
        other => Err(MapperError::Store(format!(
            "column '{}' holds {}, not a list",
            column,
            other.type_name()
        ))),
    }
}

fn apply_column_op(
    row: &mut StoredRow,
    op: &ColumnOp,
    timestamp: i64,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let column = op.column().to_string();
    match op {
        ColumnOp::Set(_, value) => row.write(&column, value.clone(), timestamp, expires_at),
        ColumnOp::Delete(_) => row.write(&column, Value::Null, timestamp, None),
        ColumnOp::ListAppend(_, values) => row.merge(&column, timestamp, expires_at, now, |current| {
            let mut items = list_of(current, &column)?;
            items.extend(values.iter().cloned());
            Ok(Value::List(items))
        })?,
        ColumnOp::ListPrepend(_, values) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut items = values.clone();
                items.extend(list_of(current, &column)?);
                Ok(Value::List(items))
            })?
        }
        ColumnOp::ListSetAt(_, index, value) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut items = list_of(current, &column)?;
                let len = items.len();
                let slot = items.get_mut(*index).ok_or_else(|| {
                    MapperError::Store(format!(
                        "list index {} out of bound for '{}', list has size {}",
                        index, column, len
                    ))
                })?;
                *slot = value.clone();
                Ok(Value::List(items))
            })?
        }
        ColumnOp::ListRemoveAt(_, index) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut items = list_of(current, &column)?;
                if *index >= items.len() {
                    return Err(MapperError::Store(format!(
                        "list index {} out of bound for '{}', list has size {}",
                        index,
                        column,
                        items.len()
                    )));
                }
                items.remove(*index);
                Ok(Value::List(items))
            })?
        }
        ColumnOp::ListRemove(_, values) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut items = list_of(current, &column)?;
                items.retain(|item| !values.contains(item));
                Ok(Value::List(items))
            })?
        }
        ColumnOp::SetAdd(_, values) => row.merge(&column, timestamp, expires_at, now, |current| {
            let mut items = match current {
                Value::Null => Default::default(),
                Value::Set(items) => items,
                other => return Err(mismatched(&column, &other, "set")),
            };
            items.extend(values.iter().cloned());
            Ok(Value::Set(items))
        })?,
        ColumnOp::SetRemove(_, values) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut items = match current {
                    Value::Null => Default::default(),
                    Value::Set(items) => items,
                    other => return Err(mismatched(&column, &other, "set")),
                };
                items.retain(|item| !values.contains(item));
                Ok(Value::Set(items))
            })?
        }
        ColumnOp::MapPut(_, entries) => row.merge(&column, timestamp, expires_at, now, |current| {
            let mut map = match current {
                Value::Null => Default::default(),
                Value::Map(map) => map,
                other => return Err(mismatched(&column, &other, "map")),
            };
            map.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(Value::Map(map))
        })?,
        ColumnOp::MapRemove(_, keys) => {
            row.merge(&column, timestamp, expires_at, now, |current| {
                let mut map = match current {
                    Value::Null => Default::default(),
                    Value::Map(map) => map,
                    other => return Err(mismatched(&column, &other, "map")),
                };
                map.retain(|k, _| !keys.contains(k));
                Ok(Value::Map(map))
            })?
        }
    }
    Ok(())
}

fn mismatched(column: &str, value: &Value, expected: &str) -> MapperError {
    MapperError::Store(format!(
        "column '{}' holds {}, not a {}",
        column,
        value.type_name(),
        expected
    ))
}

/// In-process column store with last-write-wins cells.
///
/// Every cell carries the write timestamp of the statement that produced it;
/// a write only replaces a cell with an older or equal timestamp, and a row
/// deletion shadows every write stamped at or before it. Collection deltas
/// merge into the current cell value.
///
/// ```ignore
/// let store = InMemoryColumnStore::new().with_replication_factor(3);
/// store.set_alive_replicas(1);
/// ```
pub struct InMemoryColumnStore {
    data: RwLock<StoreData>,
    timestamps: TimestampGenerator,
    replication_factor: usize,
    alive_replicas: AtomicUsize,
    reorder_batches: AtomicBool,
    clock_offset_secs: AtomicI64,
    read_count: AtomicUsize,
    fail_next_write: Mutex<Option<MapperError>>,
    journal: Mutex<Vec<WriteRequest>>,
}

impl Default for InMemoryColumnStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryColumnStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            timestamps: TimestampGenerator::new(),
            replication_factor: 1,
            alive_replicas: AtomicUsize::new(1),
            reorder_batches: AtomicBool::new(false),
            clock_offset_secs: AtomicI64::new(0),
            read_count: AtomicUsize::new(0),
            fail_next_write: Mutex::new(None),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// All replicas start alive.
    pub fn with_replication_factor(mut self, replication_factor: usize) -> Self {
        self.replication_factor = replication_factor.max(1);
        self.alive_replicas = AtomicUsize::new(self.replication_factor);
        self
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn set_alive_replicas(&self, alive: usize) {
        self.alive_replicas
            .store(alive.min(self.replication_factor), Ordering::SeqCst);
    }

    /// Applies batch statements last to first, so only write timestamps
    /// decide the final state.
    pub fn reorder_batches(&self, enabled: bool) {
        self.reorder_batches.store(enabled, Ordering::SeqCst);
    }

    /// Moves the expiry clock forward.
    pub fn advance_clock(&self, seconds: i64) {
        self.clock_offset_secs.fetch_add(seconds, Ordering::SeqCst);
    }

    /// The next write request fails with `error` and applies nothing.
    pub fn fail_next_write(&self, error: MapperError) -> Result<()> {
        *self.fail_next_write.lock()? = Some(error);
        Ok(())
    }

    /// Every write request received so far, including rejected ones.
    pub fn journal(&self) -> Result<Vec<WriteRequest>> {
        Ok(self.journal.lock()?.clone())
    }

    /// Number of row, slice and counter reads served.
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    /// Live cells of a row, bypassing consistency checks and read counting.
    pub async fn row(&self, table: &str, key: &PrimaryKeyValue) -> Option<Row> {
        let now = self.now();
        let data = self.data.read().await;
        data.live_row(table, key, now).map(|row| row.to_row(key, now))
    }

    pub async fn counter(&self, table: &str, key: &PrimaryKeyValue, column: &str) -> Option<i64> {
        let data = self.data.read().await;
        data.counters
            .get(table)
            .and_then(|rows| rows.get(key))
            .and_then(|columns| columns.get(column))
            .copied()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.clock_offset_secs.load(Ordering::SeqCst))
    }

    fn check_level(&self, level: ConsistencyLevel, access: AccessKind) -> Result<()> {
        level.check_allowed(access)?;
        let required = level.required_replicas(self.replication_factor);
        let alive = self.alive_replicas.load(Ordering::SeqCst);
        if required > alive {
            return Err(MapperError::Unavailable {
                level: level.to_string(),
                required,
                alive,
            });
        }
        Ok(())
    }

    fn apply(
        &self,
        data: &mut StoreData,
        bound: &BoundStatement,
        now: DateTime<Utc>,
    ) -> Result<StatementOutcome> {
        let statement = &bound.statement;
        let table = statement.table();
        let key = statement.key();

        if let Some(condition) = &bound.condition {
            let current = data.live_row(table, key, now);
            let applies = match condition {
                CasMode::IfNotExists => current.is_none(),
                CasMode::IfExists => current.is_some(),
                CasMode::Conditions(conditions) => conditions.iter().all(|condition| {
                    condition.evaluate(current.and_then(|row| row.live_value(condition.column(), now)))
                }),
            };
            if !applies {
                let current_values = current.map(|row| row.to_row(key, now));
                return Ok(StatementOutcome::rejected(current_values));
            }
        }

        let timestamp = bound.timestamp.unwrap_or_else(|| self.timestamps.next());
        let expires_at = bound.ttl.map(|ttl| now + Duration::seconds(ttl as i64));

        match statement {
            Statement::Insert { columns, .. } => {
                let row = data.row_mut(table, key);
                if !row.shadowed(timestamp)
                    && row.marker.as_ref().is_none_or(|m| m.timestamp <= timestamp)
                {
                    row.marker = Some(Cell {
                        value: Value::Boolean(true),
                        timestamp,
                        expires_at,
                    });
                }
                for (column, value) in columns {
                    row.write(column, value.clone(), timestamp, expires_at);
                }
            }
            Statement::Update { ops, .. } => {
                let row = data.row_mut(table, key);
                for op in ops {
                    apply_column_op(row, op, timestamp, expires_at, now)?;
                }
            }
            Statement::Delete { .. } => {
                data.row_mut(table, key).delete(timestamp);
                if let Some(rows) = data.counters.get_mut(table) {
                    rows.remove(key);
                }
            }
            Statement::CounterIncrement { column, delta, .. } => {
                *data
                    .counters
                    .entry(table.to_string())
                    .or_default()
                    .entry(key.clone())
                    .or_default()
                    .entry(column.clone())
                    .or_insert(0) += delta;
            }
        }
        Ok(StatementOutcome::applied())
    }
}

#[async_trait]
impl ColumnStore for InMemoryColumnStore {
    async fn execute(&self, request: WriteRequest) -> Result<Vec<StatementOutcome>> {
        self.journal.lock()?.push(request.clone());
        self.check_level(request.consistency, AccessKind::Write)?;
        if let Some(error) = self.fail_next_write.lock()?.take() {
            return Err(error);
        }

        let now = self.now();
        let mut data = self.data.write().await;
        // Work on a copy so a failing statement leaves nothing half-applied.
        let mut working = data.clone();

        let reversed = request.batch.is_some() && self.reorder_batches.load(Ordering::SeqCst);
        let mut order = (0..request.statements.len()).collect::<Vec<_>>();
        if reversed {
            order.reverse();
        }

        let mut outcomes = vec![StatementOutcome::default(); request.statements.len()];
        for idx in order {
            let bound = &request.statements[idx];
            debug!("store apply: {}", bound.describe());
            outcomes[idx] = self.apply(&mut working, bound, now)?;
        }

        *data = working;
        Ok(outcomes)
    }

    async fn read_row(
        &self,
        table: &str,
        key: &PrimaryKeyValue,
        columns: &[String],
        consistency: ConsistencyLevel,
    ) -> Result<Option<Row>> {
        self.check_level(consistency, AccessKind::Read)?;
        self.read_count.fetch_add(1, Ordering::SeqCst);

        let now = self.now();
        let data = self.data.read().await;
        Ok(data.live_row(table, key, now).map(|row| {
            let mut result: Row = key.components().iter().cloned().collect();
            for column in columns {
                let value = row.live_value(column, now).cloned().unwrap_or(Value::Null);
                result.insert(column.clone(), value);
            }
            result
        }))
    }

    async fn read_slice(
        &self,
        table: &str,
        query: &SliceQuery,
        columns: &[String],
    ) -> Result<Vec<Row>> {
        self.check_level(query.consistency, AccessKind::Read)?;
        self.read_count.fetch_add(1, Ordering::SeqCst);

        let now = self.now();
        let data = self.data.read().await;
        let Some(rows) = data.tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut matching = rows
            .iter()
            .filter(|(key, row)| {
                let partition = key.partition().iter().map(|(_, v)| v);
                partition.eq(query.partition.iter()) && row.is_live(now)
            })
            .filter(|(key, _)| {
                let clustering = key.clustering().iter().map(|(_, v)| v.clone()).collect::<Vec<_>>();
                query.contains(&clustering)
            })
            .collect::<Vec<_>>();

        if query.ordering == OrderingMode::Descending {
            matching.reverse();
        }
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }

        Ok(matching
            .into_iter()
            .map(|(key, row)| {
                let mut result: Row = key.components().iter().cloned().collect();
                for column in columns {
                    let value = row.live_value(column, now).cloned().unwrap_or(Value::Null);
                    result.insert(column.clone(), value);
                }
                result
            })
            .collect())
    }

    async fn read_counter(
        &self,
        table: &str,
        key: &PrimaryKeyValue,
        column: &str,
        consistency: ConsistencyLevel,
    ) -> Result<Option<i64>> {
        self.check_level(consistency, AccessKind::Read)?;
        self.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.counter(table, key, column).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::CasCondition;
    use crate::store::BatchType;

    fn key(id: i64) -> PrimaryKeyValue {
        PrimaryKeyValue::simple("id", Value::from(id))
    }

    fn insert(id: i64, name: &str) -> BoundStatement {
        BoundStatement::new(Statement::Insert {
            table: "users".to_string(),
            key: key(id),
            columns: vec![("name".to_string(), Value::from(name))],
        })
    }

    fn update(id: i64, ops: Vec<ColumnOp>) -> BoundStatement {
        BoundStatement::new(Statement::Update {
            table: "users".to_string(),
            key: key(id),
            ops,
        })
    }

    async fn run(store: &InMemoryColumnStore, statement: BoundStatement) -> StatementOutcome {
        store
            .execute(WriteRequest::single(statement, ConsistencyLevel::One))
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_insert_then_read() {
        let store = InMemoryColumnStore::new();
        run(&store, insert(10, "name")).await;

        let row = store
            .read_row("users", &key(10), &["name".to_string(), "bio".to_string()], ConsistencyLevel::One)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.get("id"), Some(&Value::from(10)));
        assert_eq!(row.get("name"), Some(&Value::from("name")));
        assert_eq!(row.get("bio"), Some(&Value::Null));
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_older_timestamp_loses() {
        let store = InMemoryColumnStore::new();
        run(&store, insert(1, "new").with_timestamp(Some(200))).await;
        run(&store, insert(1, "old").with_timestamp(Some(100))).await;

        let row = store.row("users", &key(1)).await.unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("new")));
    }

    #[tokio::test]
    async fn test_delete_shadows_older_writes() {
        let store = InMemoryColumnStore::new();
        let delete = BoundStatement::new(Statement::Delete {
            table: "users".to_string(),
            key: key(1),
        });
        run(&store, delete.with_timestamp(Some(500))).await;
        run(&store, insert(1, "late").with_timestamp(Some(400))).await;
        assert!(store.row("users", &key(1)).await.is_none());

        run(&store, insert(1, "later").with_timestamp(Some(600))).await;
        assert!(store.row("users", &key(1)).await.is_some());
    }

    #[tokio::test]
    async fn test_list_deltas() {
        let store = InMemoryColumnStore::new();
        run(
            &store,
            update(
                1,
                vec![ColumnOp::Set(
                    "tags".to_string(),
                    Value::List(vec![Value::from("foo"), Value::from("bar")]),
                )],
            ),
        )
        .await;
        run(
            &store,
            update(
                1,
                vec![
                    ColumnOp::ListAppend("tags".to_string(), vec![Value::from("qux")]),
                    ColumnOp::ListRemoveAt("tags".to_string(), 0),
                ],
            ),
        )
        .await;

        let row = store.row("users", &key(1)).await.unwrap();
        assert_eq!(
            row.get("tags"),
            Some(&Value::List(vec![Value::from("bar"), Value::from("qux")]))
        );
    }

    #[tokio::test]
    async fn test_failed_statement_applies_nothing() {
        let store = InMemoryColumnStore::new();
        let request = WriteRequest::batch(
            vec![
                insert(1, "John"),
                update(1, vec![ColumnOp::ListSetAt("tags".to_string(), 3, Value::from("x"))]),
            ],
            ConsistencyLevel::One,
            BatchType::Logged,
        );
        assert!(store.execute(request).await.is_err());
        assert!(store.row("users", &key(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_conditional_insert_returns_current_row() {
        let store = InMemoryColumnStore::new();
        run(&store, insert(10, "name")).await;

        let outcome = run(&store, insert(10, "other").with_condition(Some(CasMode::IfNotExists))).await;
        assert!(!outcome.applied);
        let current = outcome.current_values.unwrap();
        assert_eq!(current.get("id"), Some(&Value::from(10)));
        assert_eq!(current.get("name"), Some(&Value::from("name")));

        let guarded = update(10, vec![ColumnOp::Set("name".to_string(), Value::from("x"))])
            .with_condition(Some(CasMode::Conditions(vec![CasCondition::eq("name", "name")])));
        assert!(run(&store, guarded).await.applied);
    }

    #[tokio::test]
    async fn test_consistency_checks() {
        let store = InMemoryColumnStore::new().with_replication_factor(3);
        store.set_alive_replicas(1);

        let err = store
            .execute(WriteRequest::single(insert(1, "a"), ConsistencyLevel::Quorum))
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::Unavailable { required: 2, alive: 1, .. }));

        let err = store
            .execute(WriteRequest::single(insert(1, "a"), ConsistencyLevel::Serial))
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidConsistency(_)));

        let err = store
            .read_row("users", &key(1), &[], ConsistencyLevel::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidConsistency(_)));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = InMemoryColumnStore::new();
        run(&store, insert(1, "temp").with_ttl(Some(10))).await;
        assert!(store.row("users", &key(1)).await.is_some());

        store.advance_clock(11);
        assert!(store.row("users", &key(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_counters_and_row_delete() {
        let store = InMemoryColumnStore::new();
        let incr = BoundStatement::new(Statement::CounterIncrement {
            table: "users".to_string(),
            key: key(1),
            column: "visits".to_string(),
            delta: 3,
        });
        run(&store, incr.clone()).await;
        run(&store, incr).await;
        assert_eq!(store.counter("users", &key(1), "visits").await, Some(6));

        run(
            &store,
            BoundStatement::new(Statement::Delete {
                table: "users".to_string(),
                key: key(1),
            }),
        )
        .await;
        assert_eq!(store.counter("users", &key(1), "visits").await, None);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = InMemoryColumnStore::new();
        store
            .fail_next_write(MapperError::Store("boom".to_string()))
            .unwrap();

        let request = WriteRequest::single(insert(1, "a"), ConsistencyLevel::One);
        assert!(store.execute(request.clone()).await.is_err());
        assert!(store.execute(request).await.is_ok());
        assert_eq!(store.journal().unwrap().len(), 2);
    }
}
