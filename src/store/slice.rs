use crate::core::{ConsistencyLevel, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Inclusiveness of the clustering bounds of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoundingMode {
    #[default]
    InclusiveBounds,
    ExclusiveBounds,
    InclusiveStartExclusiveEnd,
    ExclusiveStartInclusiveEnd,
}

impl BoundingMode {
    fn start_inclusive(&self) -> bool {
        matches!(
            self,
            BoundingMode::InclusiveBounds | BoundingMode::InclusiveStartExclusiveEnd
        )
    }

    fn end_inclusive(&self) -> bool {
        matches!(
            self,
            BoundingMode::InclusiveBounds | BoundingMode::ExclusiveStartInclusiveEnd
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderingMode {
    #[default]
    Ascending,
    Descending,
}

/// Range read over one partition.
///
/// Bounds are clustering-key prefixes: a bound of one value constrains only
/// the first clustering component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceQuery {
    pub partition: Vec<Value>,
    pub from: Vec<Value>,
    pub to: Vec<Value>,
    pub bounding: BoundingMode,
    pub ordering: OrderingMode,
    pub limit: Option<usize>,
    pub consistency: ConsistencyLevel,
}

impl SliceQuery {
    pub fn new(partition: Vec<Value>, consistency: ConsistencyLevel) -> Self {
        Self {
            partition,
            from: Vec::new(),
            to: Vec::new(),
            bounding: BoundingMode::default(),
            ordering: OrderingMode::default(),
            limit: None,
            consistency,
        }
    }

    /// Whether a row with these clustering values falls inside the bounds.
    pub fn contains(&self, clustering: &[Value]) -> bool {
        if !self.from.is_empty() {
            match compare_prefix(clustering, &self.from) {
                Ordering::Less => return false,
                Ordering::Equal if !self.bounding.start_inclusive() => return false,
                _ => {}
            }
        }
        if !self.to.is_empty() {
            match compare_prefix(clustering, &self.to) {
                Ordering::Greater => return false,
                Ordering::Equal if !self.bounding.end_inclusive() => return false,
                _ => {}
            }
        }
        true
    }
}

fn compare_prefix(clustering: &[Value], bound: &[Value]) -> Ordering {
    let len = bound.len().min(clustering.len());
    clustering[..len].cmp(&bound[..len])
}
