use crate::core::{AccessKind, ConsistencyLevel, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which properties an insert writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InsertStrategy {
    /// Every property is written; null properties become explicit column deletes.
    #[default]
    AllFields,
    /// Null properties are left out of the insert statement.
    NotNullFields,
}

/// Mapper configuration
///
/// The default consistency levels here are the last step of consistency
/// resolution; nothing in the crate keeps them in global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Fallback read consistency
    pub default_read_consistency: ConsistencyLevel,

    /// Fallback write consistency
    pub default_write_consistency: ConsistencyLevel,

    /// Per-table read consistency, used when the entity declares none
    pub read_consistency_map: HashMap<String, ConsistencyLevel>,

    /// Per-table write consistency, used when the entity declares none
    pub write_consistency_map: HashMap<String, ConsistencyLevel>,

    /// Insert strategy for entities that do not declare their own
    pub insert_strategy: InsertStrategy,

    /// Run entity validation before insert and update
    pub bean_validation: bool,

    /// Create ordered batches unless asked otherwise
    pub ordered_batches: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            default_read_consistency: ConsistencyLevel::One,
            default_write_consistency: ConsistencyLevel::One,
            read_consistency_map: HashMap::new(),
            write_consistency_map: HashMap::new(),
            insert_strategy: InsertStrategy::AllFields,
            bean_validation: false,
            ordered_batches: false,
        }
    }
}

impl MapperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a JSON document; missing keys keep their defaults.
    ///
    /// ```ignore
    /// let config = MapperConfig::from_json(r#"{"default_write_consistency": "QUORUM"}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the fallback read consistency
    pub fn default_read_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_read_consistency = level;
        self
    }

    /// Set the fallback write consistency
    pub fn default_write_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.default_write_consistency = level;
        self
    }

    /// Set the read consistency of one table
    pub fn table_read_consistency(mut self, table: &str, level: ConsistencyLevel) -> Self {
        self.read_consistency_map.insert(table.to_string(), level);
        self
    }

    /// Set the write consistency of one table
    pub fn table_write_consistency(mut self, table: &str, level: ConsistencyLevel) -> Self {
        self.write_consistency_map.insert(table.to_string(), level);
        self
    }

    /// Set the insert strategy
    pub fn insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.insert_strategy = strategy;
        self
    }

    /// Enable or disable entity validation
    pub fn bean_validation(mut self, enabled: bool) -> Self {
        self.bean_validation = enabled;
        self
    }

    /// Make new batches ordered by default
    pub fn ordered_batches(mut self, enabled: bool) -> Self {
        self.ordered_batches = enabled;
        self
    }

    pub fn default_consistency(&self, access: AccessKind) -> ConsistencyLevel {
        match access {
            AccessKind::Read => self.default_read_consistency,
            AccessKind::Write => self.default_write_consistency,
        }
    }

    pub fn table_consistency(&self, table: &str, access: AccessKind) -> Option<ConsistencyLevel> {
        let map = match access {
            AccessKind::Read => &self.read_consistency_map,
            AccessKind::Write => &self.write_consistency_map,
        };
        map.get(table).copied()
    }
}
