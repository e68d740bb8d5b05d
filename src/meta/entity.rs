use super::property::{GetterHandle, PropertyDescriptor, PropertyKind, PropertySpec, SetterHandle};
use crate::config::InsertStrategy;
use crate::core::{AccessKind, ConsistencyLevel, MapperError, Result, Row, Value};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_]{0,47}$").unwrap();
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(MapperError::InvalidMetadata(format!(
            "{} name '{}' is not a valid column-family identifier",
            kind, name
        )))
    }
}

/// Shape of an entity's primary key.
#[derive(Debug, Clone)]
pub enum PrimaryKeyMeta {
    Simple(PropertyDescriptor),
    Composite {
        components: Vec<PropertyDescriptor>,
        partition_components: usize,
    },
}

impl PrimaryKeyMeta {
    pub fn components(&self) -> &[PropertyDescriptor] {
        match self {
            PrimaryKeyMeta::Simple(descriptor) => std::slice::from_ref(descriptor),
            PrimaryKeyMeta::Composite { components, .. } => components,
        }
    }

    pub fn partition_len(&self) -> usize {
        match self {
            PrimaryKeyMeta::Simple(_) => 1,
            PrimaryKeyMeta::Composite {
                partition_components,
                ..
            } => *partition_components,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, PrimaryKeyMeta::Composite { .. })
    }
}

/// Primary key values supplied by a caller, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id(pub Vec<Value>);

impl Id {
    pub fn composite(values: impl IntoIterator<Item = Value>) -> Self {
        Id(values.into_iter().collect())
    }
}

impl From<Value> for Id {
    fn from(value: Value) -> Self {
        Id(vec![value])
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id(vec![Value::Integer(value)])
    }
}

impl From<i32> for Id {
    fn from(value: i32) -> Self {
        Id(vec![Value::Integer(value as i64)])
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id(vec![Value::from(value)])
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id(vec![Value::Text(value)])
    }
}

impl From<Uuid> for Id {
    fn from(value: Uuid) -> Self {
        Id(vec![Value::Uuid(value)])
    }
}

impl From<Vec<Value>> for Id {
    fn from(values: Vec<Value>) -> Self {
        Id(values)
    }
}

/// A bound primary key: column names paired with values, partition first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKeyValue {
    components: Vec<(String, Value)>,
    partition_len: usize,
}

impl PrimaryKeyValue {
    pub fn simple(column: &str, value: Value) -> Self {
        Self {
            components: vec![(column.to_string(), value)],
            partition_len: 1,
        }
    }

    pub fn composite(components: Vec<(String, Value)>, partition_len: usize) -> Self {
        Self {
            components,
            partition_len,
        }
    }

    pub fn components(&self) -> &[(String, Value)] {
        &self.components
    }

    pub fn values(&self) -> Vec<Value> {
        self.components.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn partition(&self) -> &[(String, Value)] {
        &self.components[..self.partition_len]
    }

    pub fn clustering(&self) -> &[(String, Value)] {
        &self.components[self.partition_len..]
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.components
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn partition_len(&self) -> usize {
        self.partition_len
    }
}

impl fmt::Display for PrimaryKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.len() == 1 {
            let (name, value) = &self.components[0];
            return write!(f, "{}={}", name, value);
        }
        write!(f, "(")?;
        for (i, (name, value)) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

/// Immutable per-type mapping metadata, shared by every proxy of the type.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    type_name: String,
    table: String,
    primary_key: PrimaryKeyMeta,
    properties: Vec<PropertyDescriptor>,
    by_name: HashMap<String, usize>,
    read_consistency: Option<ConsistencyLevel>,
    write_consistency: Option<ConsistencyLevel>,
    insert_strategy: Option<InsertStrategy>,
}

impl EntityMeta {
    pub fn builder(type_name: &str, table: &str) -> EntityMetaBuilder {
        EntityMetaBuilder::new(type_name, table)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &PrimaryKeyMeta {
        &self.primary_key
    }

    /// Non-key properties in declaration order.
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.by_name.get(name).map(|idx| &self.properties[*idx])
    }

    pub fn property_at(&self, index: usize) -> &PropertyDescriptor {
        &self.properties[index]
    }

    pub fn require_property(&self, name: &str) -> Result<&PropertyDescriptor> {
        self.property(name).ok_or_else(|| {
            MapperError::PropertyNotFound(name.to_string(), self.type_name.clone())
        })
    }

    pub fn by_setter(&self, setter: SetterHandle) -> &PropertyDescriptor {
        &self.properties[setter.0]
    }

    pub fn by_getter(&self, getter: GetterHandle) -> &PropertyDescriptor {
        &self.properties[getter.0]
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key
            .components()
            .iter()
            .any(|component| component.name == name)
    }

    pub fn declared_consistency(&self, access: AccessKind) -> Option<ConsistencyLevel> {
        match access {
            AccessKind::Read => self.read_consistency,
            AccessKind::Write => self.write_consistency,
        }
    }

    pub fn insert_strategy(&self) -> Option<InsertStrategy> {
        self.insert_strategy
    }

    pub fn has_counters(&self) -> bool {
        self.properties.iter().any(|p| p.kind.is_counter())
    }

    /// Columns fetched when the entity itself is loaded.
    pub fn eager_columns(&self) -> Vec<String> {
        self.properties
            .iter()
            .filter(|p| !p.kind.is_lazy() && !p.kind.is_counter())
            .map(|p| p.column.clone())
            .collect()
    }

    /// Binds caller-supplied key values against the key shape.
    pub fn bind_key(&self, id: Id) -> Result<PrimaryKeyValue> {
        let components = self.primary_key.components();
        if id.0.len() != components.len() {
            return Err(MapperError::IllegalAccess(format!(
                "primary key of '{}' has {} component(s), got {}",
                self.type_name,
                components.len(),
                id.0.len()
            )));
        }
        if let Some(pos) = id.0.iter().position(Value::is_null) {
            return Err(MapperError::IllegalAccess(format!(
                "primary key component '{}' of '{}' cannot be null",
                components[pos].name, self.type_name
            )));
        }
        let bound = components
            .iter()
            .zip(id.0)
            .map(|(descriptor, value)| (descriptor.column.clone(), value))
            .collect();
        Ok(PrimaryKeyValue::composite(
            bound,
            self.primary_key.partition_len(),
        ))
    }

    /// Extracts the primary key columns of a stored row.
    pub fn key_from_row(&self, row: &Row) -> Result<PrimaryKeyValue> {
        let values = self
            .primary_key
            .components()
            .iter()
            .map(|descriptor| {
                row.get(&descriptor.column).cloned().ok_or_else(|| {
                    MapperError::Store(format!(
                        "row of '{}' is missing key column '{}'",
                        self.table, descriptor.column
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.bind_key(Id(values))
    }
}

/// Builds `EntityMeta`; handles are assigned in declaration order.
pub struct EntityMetaBuilder {
    type_name: String,
    table: String,
    simple_id: Option<PropertySpec>,
    partition_keys: Vec<PropertySpec>,
    clustering_keys: Vec<PropertySpec>,
    properties: Vec<PropertySpec>,
    read_consistency: Option<ConsistencyLevel>,
    write_consistency: Option<ConsistencyLevel>,
    insert_strategy: Option<InsertStrategy>,
}

impl EntityMetaBuilder {
    pub fn new(type_name: &str, table: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            table: table.to_string(),
            simple_id: None,
            partition_keys: Vec::new(),
            clustering_keys: Vec::new(),
            properties: Vec::new(),
            read_consistency: None,
            write_consistency: None,
            insert_strategy: None,
        }
    }

    pub fn id(self, name: &str) -> Self {
        self.id_spec(PropertySpec::new(name, PropertyKind::Simple))
    }

    pub fn id_spec(mut self, spec: PropertySpec) -> Self {
        self.simple_id = Some(spec);
        self
    }

    pub fn partition_key(self, name: &str) -> Self {
        self.partition_key_spec(PropertySpec::new(name, PropertyKind::Simple))
    }

    pub fn partition_key_spec(mut self, spec: PropertySpec) -> Self {
        self.partition_keys.push(spec);
        self
    }

    pub fn clustering_key(self, name: &str) -> Self {
        self.clustering_key_spec(PropertySpec::new(name, PropertyKind::Simple))
    }

    pub fn clustering_key_spec(mut self, spec: PropertySpec) -> Self {
        self.clustering_keys.push(spec);
        self
    }

    pub fn property(self, name: &str, kind: PropertyKind) -> Self {
        self.property_spec(PropertySpec::new(name, kind))
    }

    pub fn property_spec(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    pub fn read_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.read_consistency = Some(level);
        self
    }

    pub fn write_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.write_consistency = Some(level);
        self
    }

    pub fn insert_strategy(mut self, strategy: InsertStrategy) -> Self {
        self.insert_strategy = Some(strategy);
        self
    }

    fn describe(spec: PropertySpec, index: usize) -> Result<PropertyDescriptor> {
        let column = spec.column.unwrap_or_else(|| spec.name.clone());
        check_identifier("column", &column)?;
        if spec.kind.is_join() && spec.join_entity.is_none() {
            return Err(MapperError::InvalidMetadata(format!(
                "join property '{}' must name its related entity",
                spec.name
            )));
        }
        let setter = if spec.kind.is_counter() {
            None
        } else {
            Some(SetterHandle(index))
        };
        Ok(PropertyDescriptor {
            name: spec.name,
            column,
            kind: spec.kind,
            index,
            getter: GetterHandle(index),
            setter,
            read_consistency: spec.read_consistency,
            write_consistency: spec.write_consistency,
            join_entity: spec.join_entity,
        })
    }

    fn describe_key(spec: PropertySpec, index: usize) -> Result<PropertyDescriptor> {
        if spec.kind != PropertyKind::Simple {
            return Err(MapperError::InvalidMetadata(format!(
                "primary key component '{}' must be a simple property, got {}",
                spec.name, spec.kind
            )));
        }
        Self::describe(spec, index)
    }

    pub fn build(self) -> Result<EntityMeta> {
        check_identifier("table", &self.table)?;

        let primary_key = match (self.simple_id, self.partition_keys.is_empty()) {
            (Some(_), false) => {
                return Err(MapperError::InvalidMetadata(format!(
                    "entity '{}' declares both a simple id and partition keys",
                    self.type_name
                )));
            }
            (Some(spec), true) => {
                if !self.clustering_keys.is_empty() {
                    return Err(MapperError::InvalidMetadata(format!(
                        "entity '{}' declares clustering keys without partition keys",
                        self.type_name
                    )));
                }
                PrimaryKeyMeta::Simple(Self::describe_key(spec, 0)?)
            }
            (None, false) => {
                let partition_components = self.partition_keys.len();
                let components = self
                    .partition_keys
                    .into_iter()
                    .chain(self.clustering_keys)
                    .enumerate()
                    .map(|(i, spec)| Self::describe_key(spec, i))
                    .collect::<Result<Vec<_>>>()?;
                PrimaryKeyMeta::Composite {
                    components,
                    partition_components,
                }
            }
            (None, true) => {
                return Err(MapperError::InvalidMetadata(format!(
                    "entity '{}' has no primary key",
                    self.type_name
                )));
            }
        };

        let properties = self
            .properties
            .into_iter()
            .enumerate()
            .map(|(i, spec)| Self::describe(spec, i))
            .collect::<Result<Vec<_>>>()?;

        let mut by_name = HashMap::new();
        let mut columns = HashMap::new();
        for key in primary_key.components() {
            by_name.insert(key.name.clone(), usize::MAX);
            columns.insert(key.column.clone(), ());
        }
        for (i, property) in properties.iter().enumerate() {
            if by_name.insert(property.name.clone(), i).is_some() {
                return Err(MapperError::InvalidMetadata(format!(
                    "duplicate property '{}' on entity '{}'",
                    property.name, self.type_name
                )));
            }
            if columns.insert(property.column.clone(), ()).is_some() {
                return Err(MapperError::InvalidMetadata(format!(
                    "duplicate column '{}' on entity '{}'",
                    property.column, self.type_name
                )));
            }
        }
        by_name.retain(|_, idx| *idx != usize::MAX);

        Ok(EntityMeta {
            type_name: self.type_name,
            table: self.table,
            primary_key,
            properties,
            by_name,
            read_consistency: self.read_consistency,
            write_consistency: self.write_consistency,
            insert_strategy: self.insert_strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tweet_meta() -> EntityMeta {
        EntityMeta::builder("Tweet", "tweets")
            .partition_key("user_id")
            .clustering_key("posted_at")
            .property("content", PropertyKind::Simple)
            .property_spec(PropertySpec::new("likes", PropertyKind::Counter))
            .build()
            .unwrap()
    }

    #[test]
    fn test_composite_key_shape() {
        let meta = tweet_meta();
        assert!(meta.primary_key().is_composite());
        assert_eq!(meta.primary_key().partition_len(), 1);
        assert!(meta.is_primary_key("posted_at"));
        assert!(meta.property("posted_at").is_none());
    }

    #[test]
    fn test_counter_has_no_setter() {
        let meta = tweet_meta();
        let likes = meta.property("likes").unwrap();
        assert!(likes.setter().is_none());
        assert!(meta.property("content").unwrap().setter().is_some());
        assert_eq!(meta.eager_columns(), vec!["content".to_string()]);
    }

    #[test]
    fn test_bind_key_checks_arity_and_nulls() {
        let meta = tweet_meta();
        assert!(meta.bind_key(Id::from(1)).is_err());
        assert!(meta.bind_key(Id(vec![Value::Null, Value::from(2)])).is_err());

        let key = meta.bind_key(Id(vec![Value::from(1), Value::from(2)])).unwrap();
        assert_eq!(key.partition().len(), 1);
        assert_eq!(key.clustering()[0].0, "posted_at");
        assert_eq!(key.to_string(), "(user_id=1, posted_at=2)");
    }

    #[test]
    fn test_rejects_bad_metadata() {
        assert!(EntityMeta::builder("User", "users").build().is_err());
        assert!(EntityMeta::builder("User", "users")
            .id("id")
            .property("name", PropertyKind::Simple)
            .property("name", PropertyKind::Simple)
            .build()
            .is_err());
        assert!(EntityMeta::builder("User", "bad-table").id("id").build().is_err());
        assert!(EntityMeta::builder("User", "users")
            .id("id")
            .property("friend", PropertyKind::JoinSimple)
            .build()
            .is_err());
    }
}
