//! Entity metadata: which types are indexed, where they are routed, and
//! which relations cascade reindexing to their containers.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use sync_types::{ContainerLink, EntitySnapshot, EntityType, IndexUnitId, Settings};

use crate::error::WorkError;
use crate::interceptor::EntityIndexingInterceptor;
use crate::routing::IndexRoutingStrategy;

/// Resolves the entities that embed a given entity.
pub trait ContainmentGraph: Send + Sync {
    fn containers_of(&self, entity: &EntitySnapshot) -> Vec<ContainerLink>;
}

/// Reads containers from the links carried by the snapshot itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotContainment;

impl ContainmentGraph for SnapshotContainment {
    fn containers_of(&self, entity: &EntitySnapshot) -> Vec<ContainerLink> {
        entity.containers.clone()
    }
}

/// Indexing metadata for one entity type.
#[derive(Clone)]
pub struct EntityBinding {
    entity_type: EntityType,
    strategy: Option<Arc<dyn IndexRoutingStrategy>>,
    contained_in: HashMap<String, Option<u32>>,
    interceptor: Option<Arc<dyn EntityIndexingInterceptor>>,
}

impl EntityBinding {
    /// An indexed type whose documents are placed by `strategy`.
    pub fn indexed(
        entity_type: impl Into<EntityType>,
        strategy: Arc<dyn IndexRoutingStrategy>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            strategy: Some(strategy),
            contained_in: HashMap::new(),
            interceptor: None,
        }
    }

    /// A type that has no index of its own but is embedded in indexed ones.
    pub fn contained_only(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            strategy: None,
            contained_in: HashMap::new(),
            interceptor: None,
        }
    }

    /// Declare a contained-in relation; `max_depth` of None uses the
    /// registry-wide default.
    pub fn with_contained_in(mut self, relation: impl Into<String>, max_depth: Option<u32>) -> Self {
        self.contained_in.insert(relation.into(), max_depth);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn EntityIndexingInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn is_indexed(&self) -> bool {
        self.strategy.is_some()
    }

    /// Indexed, or the source of at least one contained-in relation.
    pub fn is_indexable(&self) -> bool {
        self.is_indexed() || !self.contained_in.is_empty()
    }

    pub fn interceptor(&self) -> Option<&Arc<dyn EntityIndexingInterceptor>> {
        self.interceptor.as_ref()
    }
}

impl fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBinding")
            .field("entity_type", &self.entity_type)
            .field("indexed", &self.is_indexed())
            .field("contained_in", &self.contained_in)
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

/// Bindings for every known entity type.
pub struct EntityRegistry {
    bindings: HashMap<EntityType, EntityBinding>,
    default_max_depth: u32,
    detect_cycles: bool,
    containment: Arc<dyn ContainmentGraph>,
}

impl EntityRegistry {
    pub fn builder() -> EntityRegistryBuilder {
        EntityRegistryBuilder::default()
    }

    pub fn binding(&self, entity_type: &EntityType) -> Option<&EntityBinding> {
        self.bindings.get(entity_type)
    }

    /// Routing strategy of an indexed type.
    pub fn strategy(
        &self,
        entity_type: &EntityType,
    ) -> Result<&Arc<dyn IndexRoutingStrategy>, WorkError> {
        self.bindings
            .get(entity_type)
            .and_then(|b| b.strategy.as_ref())
            .ok_or_else(|| WorkError::NotIndexable(entity_type.clone()))
    }

    pub fn is_indexed(&self, entity_type: &EntityType) -> bool {
        self.binding(entity_type).is_some_and(EntityBinding::is_indexed)
    }

    pub fn is_indexable(&self, entity_type: &EntityType) -> bool {
        self.binding(entity_type).is_some_and(EntityBinding::is_indexable)
    }

    /// Cascade depth of a declared relation; None when the relation is not
    /// declared on the type.
    pub fn relation_depth(&self, entity_type: &EntityType, relation: &str) -> Option<u32> {
        self.binding(entity_type)?
            .contained_in
            .get(relation)
            .map(|depth| depth.unwrap_or(self.default_max_depth))
    }

    /// Every unit of every indexed type, sorted and without duplicates.
    pub fn all_units(&self) -> Vec<IndexUnitId> {
        self.bindings
            .values()
            .filter_map(|b| b.strategy.as_ref())
            .flat_map(|s| s.all_units())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Indexed types, sorted.
    pub fn indexed_types(&self) -> Vec<&EntityType> {
        let mut types: Vec<&EntityType> = self
            .bindings
            .values()
            .filter(|b| b.is_indexed())
            .map(|b| &b.entity_type)
            .collect();
        types.sort();
        types
    }

    pub fn containment(&self) -> &Arc<dyn ContainmentGraph> {
        &self.containment
    }

    pub fn detect_cycles(&self) -> bool {
        self.detect_cycles
    }
}

/// Builder for [`EntityRegistry`].
pub struct EntityRegistryBuilder {
    bindings: HashMap<EntityType, EntityBinding>,
    default_max_depth: u32,
    detect_cycles: bool,
    containment: Option<Arc<dyn ContainmentGraph>>,
}

impl Default for EntityRegistryBuilder {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
            default_max_depth: u32::MAX,
            detect_cycles: true,
            containment: None,
        }
    }
}

impl EntityRegistryBuilder {
    /// Add a binding, replacing any earlier one for the same type.
    pub fn bind(mut self, binding: EntityBinding) -> Self {
        self.bindings.insert(binding.entity_type.clone(), binding);
        self
    }

    pub fn default_max_depth(mut self, depth: u32) -> Self {
        self.default_max_depth = depth;
        self
    }

    pub fn detect_cycles(mut self, detect: bool) -> Self {
        self.detect_cycles = detect;
        self
    }

    pub fn containment(mut self, graph: Arc<dyn ContainmentGraph>) -> Self {
        self.containment = Some(graph);
        self
    }

    /// Take cascade depth and cycle detection from settings.
    pub fn with_settings(self, settings: &Settings) -> Self {
        self.default_max_depth(settings.default_max_depth)
            .detect_cycles(settings.detect_containment_cycles)
    }

    pub fn build(self) -> EntityRegistry {
        EntityRegistry {
            bindings: self.bindings,
            default_max_depth: self.default_max_depth,
            detect_cycles: self.detect_cycles,
            containment: self
                .containment
                .unwrap_or_else(|| Arc::new(SnapshotContainment)),
        }
    }
}
