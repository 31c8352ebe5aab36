//! Per-type overrides of the default handling of a change.

use tracing::debug;

use sync_types::{EntitySnapshot, WorkItem, WorkKind};

/// Outcome of an interceptor decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingOverride {
    /// Handle the change as submitted
    ApplyDefault,
    /// Drop the change
    Skip,
    /// Reindex the entity regardless of the submitted kind
    ForceUpdate,
    /// Remove the entity from the index regardless of the submitted kind
    ForceRemove,
}

/// Policy that may override how changes to one entity type are indexed.
pub trait EntityIndexingInterceptor: Send + Sync {
    fn decide(&self, kind: WorkKind, entity: &EntitySnapshot) -> IndexingOverride;
}

impl<F> EntityIndexingInterceptor for F
where
    F: Fn(WorkKind, &EntitySnapshot) -> IndexingOverride + Send + Sync,
{
    fn decide(&self, kind: WorkKind, entity: &EntitySnapshot) -> IndexingOverride {
        self(kind, entity)
    }
}

/// Apply an interceptor to an item.
///
/// Only entity-scoped kinds that carry a snapshot are consulted; purges and
/// type-level work pass through. Returns None when the item is skipped.
pub fn intercept(interceptor: &dyn EntityIndexingInterceptor, item: WorkItem) -> Option<WorkItem> {
    let consulted = matches!(
        item.kind(),
        WorkKind::Add | WorkKind::Update | WorkKind::Delete | WorkKind::Collection | WorkKind::Index
    );
    let decision = match item.entity() {
        Some(entity) if consulted => interceptor.decide(item.kind(), entity),
        _ => return Some(item),
    };

    match decision {
        IndexingOverride::ApplyDefault => Some(item),
        IndexingOverride::Skip => {
            debug!(work = %item, "Interceptor skipped work");
            None
        }
        IndexingOverride::ForceUpdate => Some(item.with_kind(WorkKind::Update)),
        IndexingOverride::ForceRemove => Some(item.with_kind(WorkKind::Delete)),
    }
}
