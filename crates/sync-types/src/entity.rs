//! Entity identity and snapshot types.
//!
//! A snapshot is the already-extracted field content of one domain object,
//! together with links to the entities that embed it ("contained-in").
//! Deriving that content from domain objects happens before the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Name of an entity type, e.g. `"Book"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifier of one entity within its type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Tenant marker for multi-tenant deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one indexed document: (tenant, entity type, identifier).
///
/// Work for different tenants never merges, even for equal type and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: DocumentId,
    #[serde(default)]
    pub tenant: Option<TenantId>,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<DocumentId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            tenant: None,
        }
    }

    pub fn with_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant = tenant;
        self
    }

    /// Stable string form used as the primary key inside an index unit.
    pub fn document_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.tenant.as_ref().map(|t| t.as_str()).unwrap_or(""),
            self.entity_type,
            self.id
        )
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}#{}@{}", self.entity_type, self.id, tenant),
            None => write!(f, "{}#{}", self.entity_type, self.id),
        }
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Link from an embedded entity to an entity that contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLink {
    /// Relation name as declared on the embedded entity's type
    pub relation: String,
    /// Current state of the containing entity
    pub container: Arc<EntitySnapshot>,
}

/// Field content of one entity at the time the change was observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub id: DocumentId,
    /// Field name to text content
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Entities that embed this one and must be reindexed when it changes
    #[serde(default)]
    pub containers: Vec<ContainerLink>,
}

impl EntitySnapshot {
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<DocumentId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            fields: BTreeMap::new(),
            containers: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn contained_in(mut self, relation: impl Into<String>, container: EntitySnapshot) -> Self {
        self.containers.push(ContainerLink {
            relation: relation.into(),
            container: Arc::new(container),
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Key of this snapshot under the given tenant.
    pub fn key(&self, tenant: Option<&TenantId>) -> EntityKey {
        EntityKey {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            tenant: tenant.cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_key_includes_tenant() {
        let key = EntityKey::new("Book", "1");
        assert_eq!(key.document_key(), "/Book/1");

        let key = key.with_tenant(Some(TenantId::new("acme")));
        assert_eq!(key.document_key(), "acme/Book/1");
        assert_eq!(key.to_string(), "Book#1@acme");
    }

    #[test]
    fn test_keys_differ_by_tenant() {
        let a = EntityKey::new("Book", "1");
        let b = EntityKey::new("Book", "1").with_tenant(Some(TenantId::new("t1")));
        assert_ne!(a, b);
    }

    #[test]
    fn test_snapshot_builder() {
        let author = EntitySnapshot::new("Author", "7").with_field("name", "Herbert");
        let address = EntitySnapshot::new("Address", "3")
            .with_field("city", "Tacoma")
            .contained_in("author", author.clone());

        assert_eq!(address.field("city"), Some("Tacoma"));
        assert_eq!(address.containers.len(), 1);
        assert_eq!(address.containers[0].relation, "author");
        assert_eq!(*address.containers[0].container, author);
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = EntitySnapshot::new("Book", "1").with_field("title", "Dune");
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: EntitySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
