//! Mapping between entity snapshots and Tantivy documents.

use std::collections::BTreeMap;

use tantivy::schema::{Field, Value};
use tantivy::TantivyDocument;

use sync_types::{EntityKey, EntitySnapshot};

use crate::error::TantivyBackendError;
use crate::schema::{scope_value, term_value, UnitSchema};

/// Convert a snapshot to the document stored under `key`.
///
/// The key decides identity; the snapshot only supplies content.
pub fn snapshot_to_doc(
    schema: &UnitSchema,
    key: &EntityKey,
    snapshot: &EntitySnapshot,
) -> Result<TantivyDocument, TantivyBackendError> {
    let mut doc = TantivyDocument::default();
    doc.add_text(schema.doc_key, key.document_key());
    doc.add_text(schema.entity_type, key.entity_type.as_str());
    doc.add_text(schema.doc_id, key.id.as_str());
    doc.add_text(
        schema.tenant,
        key.tenant.as_ref().map(|t| t.as_str()).unwrap_or(""),
    );
    doc.add_text(schema.scope, scope_value(&key.entity_type, key.tenant.as_ref()));

    for (name, value) in &snapshot.fields {
        doc.add_text(schema.terms, term_value(name, value));
    }
    doc.add_text(schema.body, body_text(snapshot));
    doc.add_text(schema.fields_json, serde_json::to_string(&snapshot.fields)?);
    Ok(doc)
}

/// Searchable text: every field value, in field-name order.
pub fn body_text(snapshot: &EntitySnapshot) -> String {
    snapshot
        .fields
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A document read back from a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub doc_key: String,
    pub entity_type: String,
    pub doc_id: String,
    /// None when stored without a tenant
    pub tenant: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl StoredDocument {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Read the stored fields of a document.
pub fn doc_to_stored(
    schema: &UnitSchema,
    doc: &TantivyDocument,
) -> Result<StoredDocument, TantivyBackendError> {
    let text = |field: Field| {
        doc.get_first(field)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let tenant = text(schema.tenant);
    let fields_json = text(schema.fields_json);
    let fields = if fields_json.is_empty() {
        BTreeMap::new()
    } else {
        serde_json::from_str(&fields_json)?
    };

    Ok(StoredDocument {
        doc_key: text(schema.doc_key),
        entity_type: text(schema.entity_type),
        doc_id: text(schema.doc_id),
        tenant: (!tenant.is_empty()).then_some(tenant),
        fields,
    })
}
