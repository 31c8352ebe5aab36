//! Tantivy schema shared by every index unit.
//!
//! One document per entity key. Keyword fields carry the identity used for
//! replacement and deletion; `body` carries the searchable text.

use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};

use sync_types::{EntityType, TenantId};

use crate::error::TantivyBackendError;

/// Separator between a field name and its value in the `terms` field.
pub const TERM_SEPARATOR: char = '=';

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct UnitSchema {
    schema: Schema,
    /// Primary key `tenant/type/id` (STRING | STORED)
    pub doc_key: Field,
    /// Entity type name (STRING | STORED)
    pub entity_type: Field,
    /// Entity identifier (STRING | STORED)
    pub doc_id: Field,
    /// Tenant, empty when none (STRING | STORED)
    pub tenant: Field,
    /// `tenant/type`, target of tenant-scoped purges (STRING)
    pub scope: Field,
    /// One `field=value` token per entity field (STRING)
    pub terms: Field,
    /// All field values, tokenized (TEXT)
    pub body: Field,
    /// Field map as JSON (STORED)
    pub fields_json: Field,
}

impl UnitSchema {
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Field handles of an existing index's schema.
    pub fn from_schema(schema: Schema) -> Result<Self, TantivyBackendError> {
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| TantivyBackendError::SchemaMismatch(format!("missing {} field", name)))
        };
        Ok(Self {
            doc_key: field("doc_key")?,
            entity_type: field("entity_type")?,
            doc_id: field("doc_id")?,
            tenant: field("tenant")?,
            scope: field("scope")?,
            terms: field("terms")?,
            body: field("body")?,
            fields_json: field("fields_json")?,
            schema,
        })
    }
}

/// Build the unit schema.
pub fn build_unit_schema() -> UnitSchema {
    let mut builder = Schema::builder();

    let doc_key = builder.add_text_field("doc_key", STRING | STORED);
    let entity_type = builder.add_text_field("entity_type", STRING | STORED);
    let doc_id = builder.add_text_field("doc_id", STRING | STORED);
    let tenant = builder.add_text_field("tenant", STRING | STORED);
    let scope = builder.add_text_field("scope", STRING);
    // Multi-valued; exact match only
    let terms = builder.add_text_field("terms", STRING);
    let body = builder.add_text_field("body", TEXT);
    let fields_json = builder.add_text_field("fields_json", STORED);

    UnitSchema {
        schema: builder.build(),
        doc_key,
        entity_type,
        doc_id,
        tenant,
        scope,
        terms,
        body,
        fields_json,
    }
}

/// Value of the `scope` field for a type within a tenant.
pub fn scope_value(entity_type: &EntityType, tenant: Option<&TenantId>) -> String {
    format!(
        "{}/{}",
        tenant.map(TenantId::as_str).unwrap_or(""),
        entity_type
    )
}

/// Value of the `terms` field for one entity field.
pub fn term_value(field: &str, value: &str) -> String {
    format!("{}{}{}", field, TERM_SEPARATOR, value)
}
