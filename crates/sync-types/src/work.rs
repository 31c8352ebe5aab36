//! Work items: single requested changes to an entity's indexed form.
//!
//! A work item is produced by a domain-event source and consumed exactly
//! once by a work plan.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{DocumentId, EntityKey, EntitySnapshot, EntityType, TenantId};
use crate::operation::DeletionQuery;

/// Kind of change requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Entity was created
    Add,
    /// Entity was modified
    Update,
    /// Entity was deleted
    Delete,
    /// Remove one document by id, without needing the entity
    Purge,
    /// Remove all documents of the entity type
    PurgeAll,
    /// A collection owned by the entity changed
    Collection,
    /// Explicit reindex request
    Index,
    /// Remove documents of the entity type matching a query
    DeleteByQuery,
}

impl WorkKind {
    /// Whether this kind addresses one entity rather than a whole type.
    pub fn is_per_entity(&self) -> bool {
        !matches!(self, WorkKind::PurgeAll | WorkKind::DeleteByQuery)
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkKind::Add => "add",
            WorkKind::Update => "update",
            WorkKind::Delete => "delete",
            WorkKind::Purge => "purge",
            WorkKind::PurgeAll => "purge_all",
            WorkKind::Collection => "collection",
            WorkKind::Index => "index",
            WorkKind::DeleteByQuery => "delete_by_query",
        };
        f.write_str(name)
    }
}

/// One requested change against one entity type + identifier.
///
/// Constructors guarantee that kinds which need a snapshot (add, update,
/// collection, index) carry one, and that delete-by-query carries a query.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    kind: WorkKind,
    entity_type: EntityType,
    id: Option<DocumentId>,
    entity: Option<Arc<EntitySnapshot>>,
    query: Option<DeletionQuery>,
    id_rolled_back: bool,
    tenant: Option<TenantId>,
}

impl WorkItem {
    fn for_entity(kind: WorkKind, entity: EntitySnapshot) -> Self {
        Self {
            kind,
            entity_type: entity.entity_type.clone(),
            id: Some(entity.id.clone()),
            entity: Some(Arc::new(entity)),
            query: None,
            id_rolled_back: false,
            tenant: None,
        }
    }

    pub fn add(entity: EntitySnapshot) -> Self {
        Self::for_entity(WorkKind::Add, entity)
    }

    pub fn update(entity: EntitySnapshot) -> Self {
        Self::for_entity(WorkKind::Update, entity)
    }

    pub fn collection(entity: EntitySnapshot) -> Self {
        Self::for_entity(WorkKind::Collection, entity)
    }

    pub fn index(entity: EntitySnapshot) -> Self {
        Self::for_entity(WorkKind::Index, entity)
    }

    /// Deletion of an entity whose last state is known.
    pub fn delete(entity: EntitySnapshot) -> Self {
        Self::for_entity(WorkKind::Delete, entity)
    }

    /// Deletion known only by identifier.
    pub fn delete_by_id(entity_type: impl Into<EntityType>, id: impl Into<DocumentId>) -> Self {
        Self {
            kind: WorkKind::Delete,
            entity_type: entity_type.into(),
            id: Some(id.into()),
            entity: None,
            query: None,
            id_rolled_back: false,
            tenant: None,
        }
    }

    pub fn purge(entity_type: impl Into<EntityType>, id: impl Into<DocumentId>) -> Self {
        Self {
            kind: WorkKind::Purge,
            ..Self::delete_by_id(entity_type, id)
        }
    }

    pub fn purge_all(entity_type: impl Into<EntityType>) -> Self {
        Self {
            kind: WorkKind::PurgeAll,
            entity_type: entity_type.into(),
            id: None,
            entity: None,
            query: None,
            id_rolled_back: false,
            tenant: None,
        }
    }

    pub fn delete_by_query(entity_type: impl Into<EntityType>, query: DeletionQuery) -> Self {
        Self {
            kind: WorkKind::DeleteByQuery,
            query: Some(query),
            ..Self::purge_all(entity_type)
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(TenantId::new(tenant));
        self
    }

    /// Marks the identifier as rolled back by the primary store; the key is
    /// then taken from the snapshot when one is present.
    pub fn with_rolled_back_identifier(mut self) -> Self {
        self.id_rolled_back = true;
        self
    }

    /// Rewrites the kind, keeping everything else.
    ///
    /// Used by interceptors to force an update or a removal.
    pub fn with_kind(mut self, kind: WorkKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn id(&self) -> Option<&DocumentId> {
        self.id.as_ref()
    }

    pub fn entity(&self) -> Option<&Arc<EntitySnapshot>> {
        self.entity.as_ref()
    }

    pub fn query(&self) -> Option<&DeletionQuery> {
        self.query.as_ref()
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn id_rolled_back(&self) -> bool {
        self.id_rolled_back
    }

    /// Key of the affected document, for per-entity kinds.
    pub fn key(&self) -> Option<EntityKey> {
        if !self.kind.is_per_entity() {
            return None;
        }
        let id = match (&self.entity, self.id_rolled_back) {
            (Some(entity), true) => Some(entity.id.clone()),
            _ => self.id.clone(),
        }?;
        Some(EntityKey {
            entity_type: self.entity_type.clone(),
            id,
            tenant: self.tenant.clone(),
        })
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}({})", self.kind, key),
            None => write!(f, "{}({})", self.kind, self.entity_type),
        }
    }
}
