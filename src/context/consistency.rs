use crate::config::MapperConfig;
use crate::core::{AccessKind, ConsistencyLevel};
use crate::meta::{EntityMeta, PropertyDescriptor};

/// Candidate levels for one operation, highest priority first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsistencyOverrides {
    pub call: Option<ConsistencyLevel>,
    pub batch: Option<ConsistencyLevel>,
    pub field: Option<ConsistencyLevel>,
    pub class: Option<ConsistencyLevel>,
}

impl ConsistencyOverrides {
    pub fn resolve(&self, default: ConsistencyLevel) -> ConsistencyLevel {
        self.call
            .or(self.batch)
            .or(self.field)
            .or(self.class)
            .unwrap_or(default)
    }
}

/// Resolves call > batch > field > class > configured default.
///
/// Nothing is remembered between resolutions: an override given for one
/// call never leaks into the next one.
#[derive(Debug, Clone)]
pub struct ConsistencyResolver {
    config: MapperConfig,
}

impl ConsistencyResolver {
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    pub fn default_level(&self, access: AccessKind) -> ConsistencyLevel {
        self.config.default_consistency(access)
    }

    /// Level declared on the entity, else configured for its table.
    pub fn class_level(&self, meta: &EntityMeta, access: AccessKind) -> Option<ConsistencyLevel> {
        meta.declared_consistency(access)
            .or_else(|| self.config.table_consistency(meta.table(), access))
    }

    pub fn field_level(
        property: &PropertyDescriptor,
        access: AccessKind,
    ) -> Option<ConsistencyLevel> {
        match access {
            AccessKind::Read => property.read_consistency(),
            AccessKind::Write => property.write_consistency(),
        }
    }

    /// Strictest level declared by any of `properties`.
    pub fn strongest_field_level<'a>(
        properties: impl IntoIterator<Item = &'a PropertyDescriptor>,
        access: AccessKind,
    ) -> Option<ConsistencyLevel> {
        properties
            .into_iter()
            .filter_map(|property| Self::field_level(property, access))
            .reduce(ConsistencyLevel::stronger)
    }

    pub fn overrides(
        &self,
        meta: &EntityMeta,
        field: Option<ConsistencyLevel>,
        access: AccessKind,
        call: Option<ConsistencyLevel>,
        batch: Option<ConsistencyLevel>,
    ) -> ConsistencyOverrides {
        ConsistencyOverrides {
            call,
            batch,
            field,
            class: self.class_level(meta, access),
        }
    }

    pub fn resolve(
        &self,
        meta: &EntityMeta,
        field: Option<ConsistencyLevel>,
        access: AccessKind,
        call: Option<ConsistencyLevel>,
        batch: Option<ConsistencyLevel>,
    ) -> ConsistencyLevel {
        self.overrides(meta, field, access, call, batch)
            .resolve(self.default_level(access))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::PropertyKind;
    use crate::meta::PropertySpec;

    fn meta() -> EntityMeta {
        EntityMeta::builder("Tweet", "tweets")
            .id("id")
            .property_spec(
                PropertySpec::new("content", PropertyKind::LazySimple)
                    .read_consistency(ConsistencyLevel::Two),
            )
            .read_consistency(ConsistencyLevel::Quorum)
            .build()
            .unwrap()
    }

    #[test]
    fn test_priority_order() {
        let resolver = ConsistencyResolver::new(MapperConfig::default());
        let meta = meta();
        let field = meta.property("content").and_then(|p| {
            ConsistencyResolver::field_level(p, AccessKind::Read)
        });

        let all = resolver.resolve(
            &meta,
            field,
            AccessKind::Read,
            Some(ConsistencyLevel::All),
            Some(ConsistencyLevel::Three),
        );
        assert_eq!(all, ConsistencyLevel::All);

        let batch = resolver.resolve(&meta, field, AccessKind::Read, None, Some(ConsistencyLevel::Three));
        assert_eq!(batch, ConsistencyLevel::Three);

        let field_level = resolver.resolve(&meta, field, AccessKind::Read, None, None);
        assert_eq!(field_level, ConsistencyLevel::Two);

        let class = resolver.resolve(&meta, None, AccessKind::Read, None, None);
        assert_eq!(class, ConsistencyLevel::Quorum);

        let default = resolver.resolve(&meta, None, AccessKind::Write, None, None);
        assert_eq!(default, ConsistencyLevel::One);
    }

    #[test]
    fn test_table_map_applies_when_entity_declares_nothing() {
        let config = MapperConfig::new()
            .table_write_consistency("tweets", ConsistencyLevel::LocalQuorum)
            .default_write_consistency(ConsistencyLevel::Two);
        let resolver = ConsistencyResolver::new(config);
        assert_eq!(
            resolver.resolve(&meta(), None, AccessKind::Write, None, None),
            ConsistencyLevel::LocalQuorum
        );
    }
}
