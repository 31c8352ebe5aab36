//! Index operations: the optimized, routable output of a work plan.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{EntityKey, EntitySnapshot, EntityType, TenantId};
use crate::error::ConfigError;

/// Identifier of one independently addressable index unit (shard).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexUnitId(String);

impl IndexUnitId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Name of shard `n` of a sharded index, e.g. `Book.2`.
    pub fn shard(base: &str, n: usize) -> Self {
        Self(format!("{}.{}", base, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexUnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for IndexUnitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Kinds of deletion query a backend may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionQueryKind {
    Term,
    Range,
}

impl DeletionQueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionQueryKind::Term => "term",
            DeletionQueryKind::Range => "range",
        }
    }
}

impl FromStr for DeletionQueryKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "term" => Ok(DeletionQueryKind::Term),
            "range" => Ok(DeletionQueryKind::Range),
            other => Err(ConfigError::UnknownDeletionQuery(other.to_string())),
        }
    }
}

/// Query selecting documents of one entity type for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeletionQuery {
    /// Documents whose field holds exactly this value
    Term { field: String, value: String },
    /// Documents whose field value falls within the inclusive bounds
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
    },
}

impl DeletionQuery {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        DeletionQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> DeletionQueryKind {
        match self {
            DeletionQuery::Term { .. } => DeletionQueryKind::Term,
            DeletionQuery::Range { .. } => DeletionQueryKind::Range,
        }
    }
}

/// Discriminant of [`IndexOperation`], for logging and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Add,
    Update,
    Delete,
    PurgeAll,
    DeleteByQuery,
    Optimize,
    Flush,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::PurgeAll => "purge_all",
            OperationKind::DeleteByQuery => "delete_by_query",
            OperationKind::Optimize => "optimize",
            OperationKind::Flush => "flush",
        };
        f.write_str(name)
    }
}

/// One operation against the index, after merging and optimization.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOperation {
    /// Index a document that is not in the index yet
    Add {
        key: EntityKey,
        document: Arc<EntitySnapshot>,
    },
    /// Replace whatever the index holds for the key
    Update {
        key: EntityKey,
        document: Arc<EntitySnapshot>,
    },
    /// Remove the document for the key
    Delete { key: EntityKey },
    /// Remove every document of the type (within the tenant, if any)
    PurgeAll {
        entity_type: EntityType,
        tenant: Option<TenantId>,
    },
    /// Remove every document of the type matching the query
    DeleteByQuery {
        entity_type: EntityType,
        tenant: Option<TenantId>,
        query: DeletionQuery,
    },
    /// Merge index segments; maintenance only
    Optimize { entity_type: Option<EntityType> },
    /// Make applied work durable now; maintenance only
    Flush { entity_type: Option<EntityType> },
}

impl IndexOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            IndexOperation::Add { .. } => OperationKind::Add,
            IndexOperation::Update { .. } => OperationKind::Update,
            IndexOperation::Delete { .. } => OperationKind::Delete,
            IndexOperation::PurgeAll { .. } => OperationKind::PurgeAll,
            IndexOperation::DeleteByQuery { .. } => OperationKind::DeleteByQuery,
            IndexOperation::Optimize { .. } => OperationKind::Optimize,
            IndexOperation::Flush { .. } => OperationKind::Flush,
        }
    }

    /// Entity type this operation concerns, if it is scoped to one.
    pub fn entity_type(&self) -> Option<&EntityType> {
        match self {
            IndexOperation::Add { key, .. }
            | IndexOperation::Update { key, .. }
            | IndexOperation::Delete { key } => Some(&key.entity_type),
            IndexOperation::PurgeAll { entity_type, .. }
            | IndexOperation::DeleteByQuery { entity_type, .. } => Some(entity_type),
            IndexOperation::Optimize { entity_type } | IndexOperation::Flush { entity_type } => {
                entity_type.as_ref()
            }
        }
    }

    /// Entity key, for per-document operations.
    pub fn key(&self) -> Option<&EntityKey> {
        match self {
            IndexOperation::Add { key, .. }
            | IndexOperation::Update { key, .. }
            | IndexOperation::Delete { key } => Some(key),
            _ => None,
        }
    }

    /// Maintenance operations carry no index state mutation.
    pub fn is_maintenance(&self) -> bool {
        matches!(
            self,
            IndexOperation::Optimize { .. } | IndexOperation::Flush { .. }
        )
    }
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key() {
            Some(key) => write!(f, "{}({})", self.kind(), key),
            None => match self.entity_type() {
                Some(entity_type) => write!(f, "{}({})", self.kind(), entity_type),
                None => write!(f, "{}(*)", self.kind()),
            },
        }
    }
}
