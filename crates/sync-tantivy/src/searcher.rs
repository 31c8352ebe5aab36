//! Read access to a unit's committed documents.

use std::path::Path;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use sync_types::{EntityKey, EntityType};

use crate::document::{doc_to_stored, StoredDocument};
use crate::error::TantivyBackendError;
use crate::schema::UnitSchema;

/// A search result with relevance score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: StoredDocument,
    /// BM25 relevance score
    pub score: f32,
}

/// Searcher over one unit.
///
/// Sees the state as of the last [`UnitSearcher::reload`].
pub struct UnitSearcher {
    reader: IndexReader,
    schema: UnitSchema,
    query_parser: QueryParser,
}

impl UnitSearcher {
    pub fn new(index: &Index, schema: UnitSchema) -> Result<Self, TantivyBackendError> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let query_parser = QueryParser::for_index(index, vec![schema.body]);
        Ok(Self {
            reader,
            schema,
            query_parser,
        })
    }

    /// Open a file-backed unit for reading.
    pub fn open(path: &Path) -> Result<Self, TantivyBackendError> {
        if !path.join("meta.json").exists() {
            return Err(TantivyBackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no index at {}", path.display()),
            )));
        }
        let index = Index::open_in_dir(path)?;
        let schema = UnitSchema::from_schema(index.schema())?;
        Self::new(&index, schema)
    }

    /// Pick up commits made since this searcher was created.
    pub fn reload(&self) -> Result<(), TantivyBackendError> {
        self.reader.reload()?;
        Ok(())
    }

    /// Live documents in the unit.
    pub fn count(&self) -> Result<u64, TantivyBackendError> {
        Ok(self.reader.searcher().num_docs())
    }

    /// Live documents of one type.
    pub fn count_type(&self, entity_type: &EntityType) -> Result<usize, TantivyBackendError> {
        let query = TermQuery::new(
            Term::from_field_text(self.schema.entity_type, entity_type.as_str()),
            IndexRecordOption::Basic,
        );
        Ok(self.reader.searcher().search(&query, &Count)?)
    }

    /// Stored document for the key, if indexed.
    pub fn get(&self, key: &EntityKey) -> Result<Option<StoredDocument>, TantivyBackendError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.schema.doc_key, &key.document_key()),
            IndexRecordOption::Basic,
        );
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;
        match top_docs.first() {
            Some((_, address)) => {
                let doc: TantivyDocument = searcher.doc(*address)?;
                Ok(Some(doc_to_stored(&self.schema, &doc)?))
            }
            None => Ok(None),
        }
    }

    /// Full-text search over every field value.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, TantivyBackendError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parsed = self.query_parser.parse_query(query)?;
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            hits.push(SearchHit {
                document: doc_to_stored(&self.schema, &doc)?,
                score,
            });
        }
        debug!(query, hits = hits.len(), "Searched unit");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::snapshot_to_doc;
    use crate::schema::build_unit_schema;
    use sync_types::EntitySnapshot;

    fn indexed(snapshots: &[EntitySnapshot]) -> UnitSearcher {
        let schema = build_unit_schema();
        let index = Index::create_in_ram(schema.schema().clone());
        let mut writer = index.writer_with_num_threads(1, 15_000_000).unwrap();
        for snapshot in snapshots {
            writer
                .add_document(snapshot_to_doc(&schema, &snapshot.key(None), snapshot).unwrap())
                .unwrap();
        }
        writer.commit().unwrap();
        UnitSearcher::new(&index, schema).unwrap()
    }

    #[test]
    fn test_search_by_body() {
        let searcher = indexed(&[
            EntitySnapshot::new("Book", "1").with_field("title", "Dune"),
            EntitySnapshot::new("Book", "2").with_field("title", "Emma"),
        ]);
        let hits = searcher.search("dune", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.doc_id, "1");
        assert!(hits[0].score > 0.0);
        assert!(searcher.search("  ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_count_by_type() {
        let searcher = indexed(&[
            EntitySnapshot::new("Book", "1"),
            EntitySnapshot::new("Book", "2"),
            EntitySnapshot::new("Author", "1"),
        ]);
        assert_eq!(searcher.count().unwrap(), 3);
        assert_eq!(searcher.count_type(&EntityType::new("Book")).unwrap(), 2);
    }

    #[test]
    fn test_get_missing_key() {
        let searcher = indexed(&[EntitySnapshot::new("Book", "1")]);
        assert!(searcher.get(&EntityKey::new("Book", "9")).unwrap().is_none());
        assert!(searcher.get(&EntityKey::new("Book", "1")).unwrap().is_some());
    }

    #[test]
    fn test_open_missing_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        assert!(UnitSearcher::open(&temp_dir.path().join("none")).is_err());
    }
}
