//! Backend queue processor writing to one Tantivy index per unit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, warn};

use sync_engine::{
    AsyncLane, BackendError, BackendQueueProcessor, BackendRegistry, ErrorContext, ErrorHandler,
    IndexingMonitor, LogErrorHandler, UnitConfig,
};
use sync_types::{CommitPolicy, ConfigError, DeletionQueryKind, IndexOperation, IndexUnitId};

use crate::error::TantivyBackendError;
use crate::index::{ApplyTally, UnitIndex, UnitStorage};
use crate::searcher::UnitSearcher;

/// Backend name for file-backed units.
pub const TANTIVY_BACKEND: &str = "tantivy";
/// Backend name for in-memory units.
pub const RAM_BACKEND: &str = "ram";

struct UnitState {
    unit: IndexUnitId,
    storage: UnitStorage,
    index: Mutex<Option<UnitIndex>>,
    closed: AtomicBool,
    error_handler: OnceLock<Arc<dyn ErrorHandler>>,
}

impl UnitState {
    fn lock(&self) -> Result<MutexGuard<'_, Option<UnitIndex>>, TantivyBackendError> {
        self.index
            .lock()
            .map_err(|e| TantivyBackendError::IndexLocked(e.to_string()))
    }

    fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        self.error_handler
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(LogErrorHandler))
    }

    /// Apply operations in order, committing per the unit's policy.
    ///
    /// A change-set is all or nothing: a batch that fails partway is rolled
    /// back so none of its writes reach a later commit.
    fn apply(
        &self,
        operations: &[IndexOperation],
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), TantivyBackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TantivyBackendError::Closed(self.unit.to_string()));
        }
        let mut guard = self.lock()?;
        let index = guard
            .as_mut()
            .ok_or_else(|| TantivyBackendError::NotInitialized(self.unit.to_string()))?;

        for operation in operations {
            index.check(operation)?;
        }

        let mut tally = ApplyTally::default();
        let outcome = operations
            .iter()
            .try_for_each(|operation| index.apply(operation, &mut tally))
            .and_then(|()| {
                if index.policy() == CommitPolicy::PerChangeSet && index.uncommitted() > 0 {
                    index.commit()?;
                }
                Ok(())
            });
        if let Err(e) = outcome {
            if let Err(rollback_error) = index.rollback() {
                warn!(unit = %self.unit, error = %rollback_error, "Rollback after failed change-set failed");
            }
            return Err(e);
        }

        if let Some(monitor) = monitor {
            monitor.documents_added(tally.added);
            monitor.documents_removed(tally.removed);
            monitor.operations_applied(operations.len() as u64);
        }
        debug!(unit = %self.unit, count = operations.len(), "Applied change-set");
        Ok(())
    }
}

/// Tantivy-backed processor for one index unit.
pub struct TantivyBackend {
    state: Arc<UnitState>,
    lane: Mutex<Option<AsyncLane>>,
}

impl TantivyBackend {
    pub fn new(unit: IndexUnitId, storage: UnitStorage) -> Self {
        Self {
            state: Arc::new(UnitState {
                unit,
                storage,
                index: Mutex::new(None),
                closed: AtomicBool::new(false),
                error_handler: OnceLock::new(),
            }),
            lane: Mutex::new(None),
        }
    }

    pub fn unit(&self) -> &IndexUnitId {
        &self.state.unit
    }

    /// Searcher over the unit's committed documents.
    pub fn searcher(&self) -> Result<UnitSearcher, TantivyBackendError> {
        let guard = self.state.lock()?;
        guard
            .as_ref()
            .ok_or_else(|| TantivyBackendError::NotInitialized(self.state.unit.to_string()))?
            .searcher()
    }

    /// Run stream work on this unit's lane, starting it on first use.
    fn submit(
        &self,
        operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed(self.state.unit.to_string()));
        }
        let mut lane = self
            .lane
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?;
        if lane.is_none() {
            *lane = Some(AsyncLane::spawn(self.state.unit.as_str())?);
        }
        let Some(lane) = lane.as_ref() else {
            return Err(BackendError::Closed(self.state.unit.to_string()));
        };

        let state = self.state.clone();
        let monitor = monitor.cloned();
        lane.submit(move || {
            let operations = std::slice::from_ref(&operation);
            if let Err(e) = state.apply(operations, monitor.as_ref()) {
                let error = BackendError::from(e);
                state.error_handler().handle(&ErrorContext {
                    unit: &state.unit,
                    operations,
                    error: &error,
                });
            }
        })
    }
}

impl BackendQueueProcessor for TantivyBackend {
    fn initialize(&self, config: &UnitConfig) -> Result<(), BackendError> {
        let mut guard = self.state.lock()?;
        if guard.is_some() {
            debug!(unit = %self.state.unit, "Unit already initialized");
            return Ok(());
        }
        *guard = Some(UnitIndex::open(self.state.storage, config)?);
        // First initialize wins.
        let _ = self.state.error_handler.set(config.error_handler.clone());
        Ok(())
    }

    fn apply_work(
        &self,
        operations: Vec<IndexOperation>,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        Ok(self.state.apply(&operations, monitor)?)
    }

    fn apply_stream_work(
        &self,
        operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        force_async: bool,
    ) -> Result<(), BackendError> {
        if force_async {
            return self.submit(operation, monitor);
        }
        Ok(self.state.apply(std::slice::from_ref(&operation), monitor)?)
    }

    fn close(&self) -> Result<(), BackendError> {
        let lane = self
            .lane
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?
            .take();
        if let Some(lane) = lane {
            lane.shutdown()?;
        }

        if self.state.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let index = self.state.lock()?.take();
        if let Some(index) = index {
            index.close()?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        match self.state.storage {
            UnitStorage::Directory => TANTIVY_BACKEND,
            UnitStorage::Ram => RAM_BACKEND,
        }
    }

    fn supports_deletion_query(&self, kind: DeletionQueryKind) -> bool {
        kind == DeletionQueryKind::Term
    }
}

/// Factory creating one [`TantivyBackend`] per unit.
///
/// Clones share the created backends, so a caller can keep a clone after
/// registering and look the backends up later.
#[derive(Clone)]
pub struct TantivyBackendFactory {
    storage: UnitStorage,
    created: Arc<Mutex<HashMap<IndexUnitId, Arc<TantivyBackend>>>>,
}

impl TantivyBackendFactory {
    pub fn new(storage: UnitStorage) -> Self {
        Self {
            storage,
            created: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Backend created for the unit, if any.
    pub fn backend(&self, unit: &IndexUnitId) -> Option<Arc<TantivyBackend>> {
        self.created
            .lock()
            .ok()
            .and_then(|created| created.get(unit).cloned())
    }
}

impl sync_engine::BackendFactory for TantivyBackendFactory {
    fn create(&self, unit: &IndexUnitId) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> {
        let backend = Arc::new(TantivyBackend::new(unit.clone(), self.storage));
        self.created
            .lock()
            .map_err(|e| ConfigError::UnitInitialization {
                unit: unit.to_string(),
                reason: e.to_string(),
            })?
            .insert(unit.clone(), backend.clone());
        Ok(backend)
    }
}

/// Register the `tantivy` and `ram` backends.
pub fn register_tantivy_backends(registry: &mut BackendRegistry) {
    registry.register(TANTIVY_BACKEND, TantivyBackendFactory::new(UnitStorage::Directory));
    registry.register(RAM_BACKEND, TantivyBackendFactory::new(UnitStorage::Ram));
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_engine::{BackendFactory, CollectingErrorHandler, CountingMonitor};
    use sync_types::{DeletionQuery, EntityKey, EntitySnapshot, EntityType};
    use tempfile::TempDir;

    fn add(id: &str) -> IndexOperation {
        let snapshot = EntitySnapshot::new("Book", id).with_field("title", "Dune");
        IndexOperation::Add {
            key: snapshot.key(None),
            document: Arc::new(snapshot),
        }
    }

    fn ram_backend(policy: CommitPolicy) -> TantivyBackend {
        let backend = TantivyBackend::new(IndexUnitId::new("Book"), UnitStorage::Ram);
        backend
            .initialize(&UnitConfig::new(IndexUnitId::new("Book"), "unused").with_commit_policy(policy))
            .unwrap();
        backend
    }

    #[test]
    fn test_apply_before_initialize() {
        let backend = TantivyBackend::new(IndexUnitId::new("Book"), UnitStorage::Ram);
        let err = backend.apply_work(vec![add("1")], None).unwrap_err();
        assert!(matches!(err, BackendError::NotInitialized(_)));
    }

    #[test]
    fn test_change_set_committed_with_monitor_counts() {
        let backend = ram_backend(CommitPolicy::PerChangeSet);
        let monitor = Arc::new(CountingMonitor::new());
        let as_monitor: Arc<dyn IndexingMonitor> = monitor.clone();

        backend
            .apply_work(
                vec![add("1"), add("2"), IndexOperation::Delete { key: EntityKey::new("Book", "1") }],
                Some(&as_monitor),
            )
            .unwrap();

        let searcher = backend.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        assert_eq!(monitor.added(), 2);
        assert_eq!(monitor.removed(), 1);
        assert_eq!(monitor.applied(), 3);
    }

    #[test]
    fn test_manual_policy_waits_for_flush() {
        let backend = ram_backend(CommitPolicy::Manual);
        backend.apply_work(vec![add("1")], None).unwrap();
        let searcher = backend.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 0);

        backend
            .apply_stream_work(IndexOperation::Flush { entity_type: None }, None, false)
            .unwrap();
        searcher.reload().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
    }

    #[test]
    fn test_purge_all_scoped_by_type() {
        let backend = ram_backend(CommitPolicy::PerChangeSet);
        let author = EntitySnapshot::new("Author", "1");
        backend
            .apply_work(
                vec![
                    add("1"),
                    add("2"),
                    IndexOperation::Add {
                        key: author.key(None),
                        document: Arc::new(author),
                    },
                ],
                None,
            )
            .unwrap();
        backend
            .apply_stream_work(
                IndexOperation::PurgeAll {
                    entity_type: EntityType::new("Book"),
                    tenant: None,
                },
                None,
                false,
            )
            .unwrap();

        let searcher = backend.searcher().unwrap();
        assert_eq!(searcher.count_type(&EntityType::new("Book")).unwrap(), 0);
        assert_eq!(searcher.count_type(&EntityType::new("Author")).unwrap(), 1);
    }

    #[test]
    fn test_forced_async_applied_by_close() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Book");
        let backend = TantivyBackend::new(IndexUnitId::new("Book"), UnitStorage::Directory);
        backend
            .initialize(&UnitConfig::new(IndexUnitId::new("Book"), &path))
            .unwrap();

        backend.apply_stream_work(add("1"), None, true).unwrap();
        backend.close().unwrap();

        let searcher = UnitSearcher::open(&path).unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
    }

    fn range_delete() -> IndexOperation {
        IndexOperation::DeleteByQuery {
            entity_type: EntityType::new("Book"),
            tenant: None,
            query: DeletionQuery::Range {
                field: "year".into(),
                lower: Some("1960".into()),
                upper: None,
            },
        }
    }

    #[test]
    fn test_failed_change_set_leaves_nothing_behind() {
        let backend = ram_backend(CommitPolicy::PerChangeSet);
        let err = backend
            .apply_work(vec![add("1"), range_delete()], None)
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));

        backend.apply_work(vec![add("2")], None).unwrap();
        let searcher = backend.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        assert!(searcher.get(&EntityKey::new("Book", "1")).unwrap().is_none());
    }

    #[test]
    fn test_rejected_change_set_keeps_earlier_pending_work() {
        let backend = ram_backend(CommitPolicy::Manual);
        backend.apply_work(vec![add("1")], None).unwrap();
        assert!(backend.apply_work(vec![add("2"), range_delete()], None).is_err());

        backend
            .apply_stream_work(IndexOperation::Flush { entity_type: None }, None, false)
            .unwrap();
        let searcher = backend.searcher().unwrap();
        assert_eq!(searcher.count().unwrap(), 1);
        assert!(searcher.get(&EntityKey::new("Book", "1")).unwrap().is_some());
    }

    #[test]
    fn test_forced_async_failure_reaches_error_handler() {
        let handler = Arc::new(CollectingErrorHandler::new());
        let backend = TantivyBackend::new(IndexUnitId::new("Book"), UnitStorage::Ram);
        backend
            .initialize(
                &UnitConfig::new(IndexUnitId::new("Book"), "unused")
                    .with_error_handler(handler.clone()),
            )
            .unwrap();

        backend.apply_stream_work(range_delete(), None, true).unwrap();
        backend.close().unwrap();

        let failures = handler.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].unit, IndexUnitId::new("Book"));
        assert!(matches!(failures[0].error, BackendError::Unsupported(_)));
        assert_eq!(failures[0].operations, vec![range_delete()]);
    }

    #[test]
    fn test_closed_backend_rejects_work() {
        let backend = ram_backend(CommitPolicy::PerChangeSet);
        backend.close().unwrap();
        backend.close().unwrap();
        let err = backend.apply_work(vec![add("1")], None).unwrap_err();
        assert!(matches!(err, BackendError::Closed(_)));
    }

    #[test]
    fn test_capabilities() {
        let backend = TantivyBackend::new(IndexUnitId::new("Book"), UnitStorage::Ram);
        assert!(backend.supports_enlistment());
        assert!(backend.supports_deletion_query(DeletionQueryKind::Term));
        assert!(!backend.supports_deletion_query(DeletionQueryKind::Range));
        assert_eq!(backend.name(), RAM_BACKEND);
    }

    #[test]
    fn test_factory_keeps_created_backends() {
        let factory = TantivyBackendFactory::new(UnitStorage::Ram);
        let mut registry = BackendRegistry::new();
        registry.register("ram", factory.clone());

        let unit = IndexUnitId::new("Book.0");
        registry.create("ram", &unit).unwrap();
        assert!(factory.backend(&unit).is_some());
        assert!(factory.backend(&IndexUnitId::new("Book.1")).is_none());
        assert!(factory.create(&IndexUnitId::new("Book.1")).is_ok());
        assert!(factory.backend(&IndexUnitId::new("Book.1")).is_some());
    }

    #[test]
    fn test_register_builtin_names() {
        let mut registry = BackendRegistry::with_builtins();
        register_tantivy_backends(&mut registry);
        assert_eq!(registry.names(), vec!["blackhole", "ram", "tantivy"]);
    }
}
