//! Per-unit Tantivy index: creation, writes, commits and merges.

use std::path::Path;

use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::IndexRecordOption;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Term};
use tracing::{debug, info, warn};

use sync_engine::UnitConfig;
use sync_types::{CommitPolicy, DeletionQuery, EntityKey, EntityType, IndexOperation, TenantId};

use crate::document::snapshot_to_doc;
use crate::error::TantivyBackendError;
use crate::schema::{build_unit_schema, scope_value, term_value, UnitSchema};
use crate::searcher::UnitSearcher;

/// Where a unit keeps its segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStorage {
    /// MmapDirectory under the unit's index path
    Directory,
    /// In memory; lost on close
    Ram,
}

/// Documents touched by applied operations, for monitors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyTally {
    pub added: u64,
    pub removed: u64,
}

/// Open an existing index or create a new one.
///
/// Uses MmapDirectory for persistence.
pub fn open_or_create_index(path: &Path) -> Result<Index, TantivyBackendError> {
    if path.join("meta.json").exists() {
        debug!(path = ?path, "Opening existing index");
        Ok(Index::open_in_dir(path)?)
    } else {
        info!(path = ?path, "Creating new index");
        std::fs::create_dir_all(path)?;
        let schema = build_unit_schema();
        Ok(Index::create_in_dir(path, schema.schema().clone())?)
    }
}

/// One unit's index with its writer.
///
/// Nothing written is visible to readers until [`UnitIndex::commit`].
pub struct UnitIndex {
    unit: String,
    index: Index,
    schema: UnitSchema,
    writer: IndexWriter,
    reader: IndexReader,
    policy: CommitPolicy,
    uncommitted: usize,
}

impl UnitIndex {
    pub fn open(storage: UnitStorage, config: &UnitConfig) -> Result<Self, TantivyBackendError> {
        let index = match storage {
            UnitStorage::Directory => open_or_create_index(&config.index_path)?,
            UnitStorage::Ram => Index::create_in_ram(build_unit_schema().schema().clone()),
        };
        let schema = UnitSchema::from_schema(index.schema())?;
        let memory_budget = config.writer_memory_mb * 1024 * 1024;
        // One thread per unit; a deployment may have many units.
        let writer = index.writer_with_num_threads(1, memory_budget)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        info!(
            unit = %config.unit,
            storage = ?storage,
            commit_policy = ?config.commit_policy,
            "Opened unit index"
        );
        Ok(Self {
            unit: config.unit.to_string(),
            index,
            schema,
            writer,
            reader,
            policy: config.commit_policy,
            uncommitted: 0,
        })
    }

    pub fn schema(&self) -> &UnitSchema {
        &self.schema
    }

    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Operations written since the last commit.
    pub fn uncommitted(&self) -> usize {
        self.uncommitted
    }

    /// Searcher over this unit's committed documents.
    pub fn searcher(&self) -> Result<UnitSearcher, TantivyBackendError> {
        UnitSearcher::new(&self.index, self.schema.clone())
    }

    /// Reject an operation this unit cannot apply, before anything is written.
    pub fn check(&self, operation: &IndexOperation) -> Result<(), TantivyBackendError> {
        match operation {
            IndexOperation::DeleteByQuery { query, .. }
                if !matches!(query, DeletionQuery::Term { .. }) =>
            {
                Err(TantivyBackendError::UnsupportedQuery(
                    query.kind().as_str().to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Write one operation; maintenance operations commit.
    pub fn apply(
        &mut self,
        operation: &IndexOperation,
        tally: &mut ApplyTally,
    ) -> Result<(), TantivyBackendError> {
        match operation {
            IndexOperation::Add { key, document } => {
                self.writer
                    .add_document(snapshot_to_doc(&self.schema, key, document)?)?;
                tally.added += 1;
            }
            IndexOperation::Update { key, document } => {
                self.writer.delete_term(self.key_term(key));
                self.writer
                    .add_document(snapshot_to_doc(&self.schema, key, document)?)?;
                tally.added += 1;
            }
            IndexOperation::Delete { key } => {
                self.writer.delete_term(self.key_term(key));
                tally.removed += 1;
            }
            IndexOperation::PurgeAll {
                entity_type,
                tenant,
            } => {
                self.writer
                    .delete_term(self.type_term(entity_type, tenant.as_ref()));
            }
            IndexOperation::DeleteByQuery {
                entity_type,
                tenant,
                query,
            } => {
                self.delete_by_query(entity_type, tenant.as_ref(), query)?;
            }
            IndexOperation::Flush { .. } => {
                self.commit()?;
                return Ok(());
            }
            IndexOperation::Optimize { .. } => {
                self.optimize()?;
                return Ok(());
            }
        }
        self.uncommitted += 1;
        Ok(())
    }

    /// Commit pending writes and make them visible.
    pub fn commit(&mut self) -> Result<u64, TantivyBackendError> {
        let opstamp = self.writer.commit()?;
        self.reader.reload()?;
        if self.uncommitted > 0 {
            info!(unit = %self.unit, opstamp, operations = self.uncommitted, "Committed unit changes");
        }
        self.uncommitted = 0;
        Ok(opstamp)
    }

    /// Drop writes made since the last commit.
    pub fn rollback(&mut self) -> Result<u64, TantivyBackendError> {
        let opstamp = self.writer.rollback()?;
        warn!(unit = %self.unit, opstamp, discarded = self.uncommitted, "Rolled back unit changes");
        self.uncommitted = 0;
        Ok(opstamp)
    }

    /// Commit, then merge every searchable segment into one.
    pub fn optimize(&mut self) -> Result<(), TantivyBackendError> {
        self.commit()?;
        let segments = self.index.searchable_segment_ids()?;
        if segments.len() < 2 {
            debug!(unit = %self.unit, segments = segments.len(), "Nothing to merge");
            return Ok(());
        }
        self.writer.merge(&segments).wait()?;
        self.reader.reload()?;
        info!(unit = %self.unit, merged = segments.len(), "Merged unit segments");
        Ok(())
    }

    /// Settle pending writes per policy and wait for merges to finish.
    pub fn close(mut self) -> Result<(), TantivyBackendError> {
        if self.uncommitted > 0 {
            match self.policy {
                CommitPolicy::Manual => {
                    self.rollback()?;
                }
                CommitPolicy::PerChangeSet | CommitPolicy::OnClose => {
                    self.commit()?;
                }
            }
        }
        self.writer.wait_merging_threads()?;
        debug!(unit = %self.unit, "Closed unit index");
        Ok(())
    }

    fn key_term(&self, key: &EntityKey) -> Term {
        Term::from_field_text(self.schema.doc_key, &key.document_key())
    }

    /// Every document of the type, or of the type within one tenant.
    fn type_term(&self, entity_type: &EntityType, tenant: Option<&TenantId>) -> Term {
        match tenant {
            Some(_) => Term::from_field_text(self.schema.scope, &scope_value(entity_type, tenant)),
            None => Term::from_field_text(self.schema.entity_type, entity_type.as_str()),
        }
    }

    fn delete_by_query(
        &mut self,
        entity_type: &EntityType,
        tenant: Option<&TenantId>,
        query: &DeletionQuery,
    ) -> Result<(), TantivyBackendError> {
        let DeletionQuery::Term { field, value } = query else {
            return Err(TantivyBackendError::UnsupportedQuery(
                query.kind().as_str().to_string(),
            ));
        };
        let matching: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.schema.terms, &term_value(field, value)),
            IndexRecordOption::Basic,
        ));
        let of_type = TermQuery::new(self.type_term(entity_type, tenant), IndexRecordOption::Basic);
        self.writer.delete_query(Box::new(BooleanQuery::new(vec![
            (Occur::Must, matching),
            (Occur::Must, Box::new(of_type)),
        ])))?;
        debug!(unit = %self.unit, field = %field, "Deleted by term query");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_types::{EntitySnapshot, IndexUnitId};
    use tempfile::TempDir;

    fn ram_unit() -> UnitIndex {
        let config = UnitConfig::new(IndexUnitId::new("Book"), "unused");
        UnitIndex::open(UnitStorage::Ram, &config).unwrap()
    }

    fn add(id: &str, genre: &str) -> IndexOperation {
        let snapshot = EntitySnapshot::new("Book", id)
            .with_field("title", format!("Book {}", id))
            .with_field("genre", genre);
        IndexOperation::Add {
            key: snapshot.key(None),
            document: Arc::new(snapshot),
        }
    }

    #[test]
    fn test_open_or_create_in_dir() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Book");
        let _index = open_or_create_index(&path).unwrap();
        assert!(path.join("meta.json").exists());
        let _reopened = open_or_create_index(&path).unwrap();
    }

    #[test]
    fn test_writes_visible_after_commit() {
        let mut unit = ram_unit();
        let searcher = unit.searcher().unwrap();
        let mut tally = ApplyTally::default();

        unit.apply(&add("1", "sf"), &mut tally).unwrap();
        assert_eq!(unit.uncommitted(), 1);
        searcher.reload().unwrap();
        assert_eq!(searcher.count().unwrap(), 0);

        unit.commit().unwrap();
        searcher.reload().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        assert_eq!(tally, ApplyTally { added: 1, removed: 0 });
    }

    #[test]
    fn test_update_replaces_document() {
        let mut unit = ram_unit();
        let mut tally = ApplyTally::default();
        unit.apply(&add("1", "sf"), &mut tally).unwrap();
        unit.commit().unwrap();

        let snapshot = EntitySnapshot::new("Book", "1").with_field("title", "Dune");
        let update = IndexOperation::Update {
            key: snapshot.key(None),
            document: Arc::new(snapshot),
        };
        unit.apply(&update, &mut tally).unwrap();
        unit.commit().unwrap();

        let searcher = unit.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        let stored = searcher.get(&EntityKey::new("Book", "1")).unwrap().unwrap();
        assert_eq!(stored.field("title"), Some("Dune"));
    }

    #[test]
    fn test_delete_by_term_query() {
        let mut unit = ram_unit();
        let mut tally = ApplyTally::default();
        for (id, genre) in [("1", "sf"), ("2", "sf"), ("3", "crime")] {
            unit.apply(&add(id, genre), &mut tally).unwrap();
        }
        let delete = IndexOperation::DeleteByQuery {
            entity_type: EntityType::new("Book"),
            tenant: None,
            query: DeletionQuery::term("genre", "sf"),
        };
        unit.apply(&delete, &mut tally).unwrap();
        unit.commit().unwrap();

        let searcher = unit.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        assert!(searcher.get(&EntityKey::new("Book", "3")).unwrap().is_some());
    }

    #[test]
    fn test_range_query_is_unsupported() {
        let mut unit = ram_unit();
        let delete = IndexOperation::DeleteByQuery {
            entity_type: EntityType::new("Book"),
            tenant: None,
            query: DeletionQuery::Range {
                field: "year".into(),
                lower: Some("1960".into()),
                upper: None,
            },
        };
        let err = unit.apply(&delete, &mut ApplyTally::default()).unwrap_err();
        assert!(matches!(err, TantivyBackendError::UnsupportedQuery(k) if k == "range"));
    }

    #[test]
    fn test_optimize_merges_segments() {
        let mut unit = ram_unit();
        let mut tally = ApplyTally::default();
        for i in 0..3 {
            unit.apply(&add(&i.to_string(), "sf"), &mut tally).unwrap();
            unit.commit().unwrap();
        }
        assert!(unit.index.searchable_segment_ids().unwrap().len() > 1);

        unit.apply(&IndexOperation::Optimize { entity_type: None }, &mut tally)
            .unwrap();
        assert_eq!(unit.index.searchable_segment_ids().unwrap().len(), 1);
        assert_eq!(unit.searcher().unwrap().count().unwrap(), 3);
    }

    #[test]
    fn test_manual_policy_discards_on_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = UnitConfig::new(IndexUnitId::new("Book"), temp_dir.path().join("Book"))
            .with_commit_policy(CommitPolicy::Manual);
        let mut unit = UnitIndex::open(UnitStorage::Directory, &config).unwrap();
        unit.apply(&add("1", "sf"), &mut ApplyTally::default()).unwrap();
        unit.close().unwrap();

        let searcher = UnitSearcher::open(&temp_dir.path().join("Book")).unwrap();
        assert_eq!(searcher.count().unwrap(), 0);
    }

    #[test]
    fn test_on_close_policy_commits_on_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = UnitConfig::new(IndexUnitId::new("Book"), temp_dir.path().join("Book"))
            .with_commit_policy(CommitPolicy::OnClose);
        let mut unit = UnitIndex::open(UnitStorage::Directory, &config).unwrap();
        unit.apply(&add("1", "sf"), &mut ApplyTally::default()).unwrap();
        unit.close().unwrap();

        let searcher = UnitSearcher::open(&temp_dir.path().join("Book")).unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
    }
}
