//! Index routing: which index unit(s) each operation targets.
//!
//! A pluggable [`IndexRoutingStrategy`] per entity type answers the
//! placement questions; [`route`] applies the fixed per-kind rules on top:
//!
//! - Add and Update go to exactly one unit, chosen from the content.
//! - Delete, PurgeAll and DeleteByQuery go to every unit that might hold
//!   the document(s).
//! - Optimize and Flush are broadcast to every unit.
//!
//! An Update additionally sends a Delete to every other candidate unit, so
//! a document whose placement changed does not linger in its old unit.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use tracing::debug;

use sync_types::{DocumentId, EntitySnapshot, EntityType, IndexOperation, IndexUnitId};

use crate::error::WorkError;
use crate::metadata::EntityRegistry;

/// Strategy deciding the placement of one entity type's documents.
pub trait IndexRoutingStrategy: Send + Sync {
    /// Unit that receives a new or updated document.
    fn unit_for_addition(
        &self,
        entity_type: &EntityType,
        id: &DocumentId,
        document: &EntitySnapshot,
    ) -> IndexUnitId;

    /// Units that might hold the document (all documents when `id` is None).
    fn units_for_deletion(&self, entity_type: &EntityType, id: Option<&DocumentId>)
        -> Vec<IndexUnitId>;

    /// Every unit this strategy manages.
    fn all_units(&self) -> Vec<IndexUnitId>;
}

/// Everything lives in one unit.
#[derive(Debug, Clone)]
pub struct NotShardedStrategy {
    unit: IndexUnitId,
}

impl NotShardedStrategy {
    pub fn new(unit: impl Into<IndexUnitId>) -> Self {
        Self { unit: unit.into() }
    }
}

impl IndexRoutingStrategy for NotShardedStrategy {
    fn unit_for_addition(
        &self,
        _entity_type: &EntityType,
        _id: &DocumentId,
        _document: &EntitySnapshot,
    ) -> IndexUnitId {
        self.unit.clone()
    }

    fn units_for_deletion(
        &self,
        _entity_type: &EntityType,
        _id: Option<&DocumentId>,
    ) -> Vec<IndexUnitId> {
        vec![self.unit.clone()]
    }

    fn all_units(&self) -> Vec<IndexUnitId> {
        vec![self.unit.clone()]
    }
}

/// Shard number for a value among `shards` shards.
pub fn shard_for(value: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Places documents by hashing their identifier.
///
/// The placement is a function of the id alone, so a deletion targets
/// exactly one unit.
#[derive(Debug, Clone)]
pub struct IdHashShardingStrategy {
    units: Vec<IndexUnitId>,
}

impl IdHashShardingStrategy {
    /// Shards named `{base}.0` .. `{base}.{shards - 1}`.
    pub fn new(base: &str, shards: usize) -> Self {
        Self {
            units: (0..shards.max(1)).map(|n| IndexUnitId::shard(base, n)).collect(),
        }
    }

    fn unit_for_id(&self, id: &DocumentId) -> IndexUnitId {
        self.units[shard_for(id.as_str(), self.units.len())].clone()
    }
}

impl IndexRoutingStrategy for IdHashShardingStrategy {
    fn unit_for_addition(
        &self,
        _entity_type: &EntityType,
        id: &DocumentId,
        _document: &EntitySnapshot,
    ) -> IndexUnitId {
        self.unit_for_id(id)
    }

    fn units_for_deletion(
        &self,
        _entity_type: &EntityType,
        id: Option<&DocumentId>,
    ) -> Vec<IndexUnitId> {
        match id {
            Some(id) => vec![self.unit_for_id(id)],
            None => self.units.clone(),
        }
    }

    fn all_units(&self) -> Vec<IndexUnitId> {
        self.units.clone()
    }
}

/// Places documents by hashing one content field.
///
/// The previous value of the field is unknown at deletion time, so
/// deletions target every unit.
#[derive(Debug, Clone)]
pub struct FieldShardingStrategy {
    field: String,
    units: Vec<IndexUnitId>,
}

impl FieldShardingStrategy {
    pub fn new(field: impl Into<String>, base: &str, shards: usize) -> Self {
        Self {
            field: field.into(),
            units: (0..shards.max(1)).map(|n| IndexUnitId::shard(base, n)).collect(),
        }
    }
}

impl IndexRoutingStrategy for FieldShardingStrategy {
    fn unit_for_addition(
        &self,
        _entity_type: &EntityType,
        _id: &DocumentId,
        document: &EntitySnapshot,
    ) -> IndexUnitId {
        let value = document.field(&self.field).unwrap_or_default();
        self.units[shard_for(value, self.units.len())].clone()
    }

    fn units_for_deletion(
        &self,
        _entity_type: &EntityType,
        _id: Option<&DocumentId>,
    ) -> Vec<IndexUnitId> {
        self.units.clone()
    }

    fn all_units(&self) -> Vec<IndexUnitId> {
        self.units.clone()
    }
}

/// One operation bound to one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedOperation {
    pub unit: IndexUnitId,
    pub operation: IndexOperation,
}

/// Result of routing one operation: a non-empty set of targets.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRoute {
    targets: Vec<RoutedOperation>,
}

impl IndexRoute {
    pub fn targets(&self) -> &[RoutedOperation] {
        &self.targets
    }

    pub fn into_targets(self) -> Vec<RoutedOperation> {
        self.targets
    }

    /// Distinct units, in target order.
    pub fn units(&self) -> Vec<&IndexUnitId> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .map(|t| &t.unit)
            .filter(|unit| seen.insert(*unit))
            .collect()
    }
}

fn broadcast(units: Vec<IndexUnitId>, operation: &IndexOperation) -> Vec<RoutedOperation> {
    units
        .into_iter()
        .map(|unit| RoutedOperation {
            unit,
            operation: operation.clone(),
        })
        .collect()
}

/// Route one operation to its target units.
pub fn route(operation: &IndexOperation, registry: &EntityRegistry) -> Result<IndexRoute, WorkError> {
    let targets = match operation {
        IndexOperation::Add { key, document } => {
            let strategy = registry.strategy(&key.entity_type)?;
            let unit = strategy.unit_for_addition(&key.entity_type, &key.id, document);
            vec![RoutedOperation {
                unit,
                operation: operation.clone(),
            }]
        }
        IndexOperation::Update { key, document } => {
            let strategy = registry.strategy(&key.entity_type)?;
            let target = strategy.unit_for_addition(&key.entity_type, &key.id, document);
            let mut targets: Vec<RoutedOperation> = strategy
                .units_for_deletion(&key.entity_type, Some(&key.id))
                .into_iter()
                .filter(|unit| *unit != target)
                .map(|unit| RoutedOperation {
                    unit,
                    operation: IndexOperation::Delete { key: key.clone() },
                })
                .collect();
            targets.push(RoutedOperation {
                unit: target,
                operation: operation.clone(),
            });
            targets
        }
        IndexOperation::Delete { key } => {
            let strategy = registry.strategy(&key.entity_type)?;
            let units = non_empty(
                strategy.units_for_deletion(&key.entity_type, Some(&key.id)),
                strategy.as_ref(),
            );
            broadcast(units, operation)
        }
        IndexOperation::PurgeAll { entity_type, .. }
        | IndexOperation::DeleteByQuery { entity_type, .. } => {
            let strategy = registry.strategy(entity_type)?;
            let units = non_empty(
                strategy.units_for_deletion(entity_type, None),
                strategy.as_ref(),
            );
            broadcast(units, operation)
        }
        IndexOperation::Optimize { entity_type } | IndexOperation::Flush { entity_type } => {
            let units = match entity_type {
                Some(entity_type) => registry.strategy(entity_type)?.all_units(),
                None => registry.all_units(),
            };
            broadcast(units, operation)
        }
    };

    debug!(
        operation = %operation,
        targets = targets.len(),
        "Routed operation"
    );
    Ok(IndexRoute { targets })
}

fn non_empty(units: Vec<IndexUnitId>, strategy: &dyn IndexRoutingStrategy) -> Vec<IndexUnitId> {
    if units.is_empty() {
        strategy.all_units()
    } else {
        units
    }
}
