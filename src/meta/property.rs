use crate::core::ConsistencyLevel;
use std::fmt;

/// Classification of a mapped property; drives interceptor dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Simple,
    LazySimple,
    List,
    LazyList,
    Set,
    LazySet,
    Map,
    LazyMap,
    Counter,
    JoinSimple,
    JoinList,
    JoinSet,
    JoinMap,
}

/// Shape of a collection-valued property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionType {
    List,
    Set,
    Map,
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionType::List => write!(f, "list"),
            CollectionType::Set => write!(f, "set"),
            CollectionType::Map => write!(f, "map"),
        }
    }
}

impl PropertyKind {
    /// Join properties hold foreign keys and are fetched on first access.
    pub fn is_lazy(&self) -> bool {
        matches!(
            self,
            Self::LazySimple
                | Self::LazyList
                | Self::LazySet
                | Self::LazyMap
                | Self::JoinSimple
                | Self::JoinList
                | Self::JoinSet
                | Self::JoinMap
        )
    }

    pub fn is_join(&self) -> bool {
        matches!(
            self,
            Self::JoinSimple | Self::JoinList | Self::JoinSet | Self::JoinMap
        )
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, Self::Counter)
    }

    pub fn collection_type(&self) -> Option<CollectionType> {
        match self {
            Self::List | Self::LazyList | Self::JoinList => Some(CollectionType::List),
            Self::Set | Self::LazySet | Self::JoinSet => Some(CollectionType::Set),
            Self::Map | Self::LazyMap | Self::JoinMap => Some(CollectionType::Map),
            _ => None,
        }
    }

    pub fn is_collection(&self) -> bool {
        self.collection_type().is_some()
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "SIMPLE",
            Self::LazySimple => "LAZY_SIMPLE",
            Self::List => "LIST",
            Self::LazyList => "LAZY_LIST",
            Self::Set => "SET",
            Self::LazySet => "LAZY_SET",
            Self::Map => "MAP",
            Self::LazyMap => "LAZY_MAP",
            Self::Counter => "COUNTER",
            Self::JoinSimple => "JOIN_SIMPLE",
            Self::JoinList => "JOIN_LIST",
            Self::JoinSet => "JOIN_SET",
            Self::JoinMap => "JOIN_MAP",
        };
        write!(f, "{}", name)
    }
}

/// Handle standing for a property's read accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GetterHandle(pub(crate) usize);

/// Handle standing for a property's write accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetterHandle(pub(crate) usize);

impl GetterHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl SetterHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Static description of one mapped property.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) kind: PropertyKind,
    pub(crate) index: usize,
    pub(crate) getter: GetterHandle,
    pub(crate) setter: Option<SetterHandle>,
    pub(crate) read_consistency: Option<ConsistencyLevel>,
    pub(crate) write_consistency: Option<ConsistencyLevel>,
    pub(crate) join_entity: Option<String>,
}

impl PropertyDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn getter(&self) -> GetterHandle {
        self.getter
    }

    /// Counters never expose a setter.
    pub fn setter(&self) -> Option<SetterHandle> {
        self.setter
    }

    pub fn read_consistency(&self) -> Option<ConsistencyLevel> {
        self.read_consistency
    }

    pub fn write_consistency(&self) -> Option<ConsistencyLevel> {
        self.write_consistency
    }

    /// Type name of the related entity, for join kinds.
    pub fn join_entity(&self) -> Option<&str> {
        self.join_entity.as_deref()
    }
}

/// Declarative form of a property, turned into a `PropertyDescriptor` by
/// `EntityMetaBuilder`, which assigns handles.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub(crate) name: String,
    pub(crate) column: Option<String>,
    pub(crate) kind: PropertyKind,
    pub(crate) read_consistency: Option<ConsistencyLevel>,
    pub(crate) write_consistency: Option<ConsistencyLevel>,
    pub(crate) join_entity: Option<String>,
}

impl PropertySpec {
    pub fn new(name: &str, kind: PropertyKind) -> Self {
        Self {
            name: name.to_string(),
            column: None,
            kind,
            read_consistency: None,
            write_consistency: None,
            join_entity: None,
        }
    }

    /// Column name when it differs from the property name
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
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

    pub fn join_entity(mut self, type_name: &str) -> Self {
        self.join_entity = Some(type_name.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(PropertyKind::LazyList.is_lazy());
        assert!(PropertyKind::JoinSimple.is_lazy());
        assert!(!PropertyKind::Simple.is_lazy());
        assert_eq!(
            PropertyKind::JoinMap.collection_type(),
            Some(CollectionType::Map)
        );
        assert_eq!(PropertyKind::Counter.collection_type(), None);
        assert!(PropertyKind::Counter.is_counter());
    }
}
