//! Backend queue processors: the per-unit collaborators that apply work.
//!
//! Each index unit owns one processor. The pipeline only decides what goes
//! where; applying it (and deciding when to durably commit) is the
//! processor's job.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use sync_types::{CommitPolicy, ConfigError, DeletionQueryKind, IndexOperation, IndexUnitId, Settings};

use crate::error::BackendError;
use crate::error_handler::{ErrorHandler, LogErrorHandler};
use crate::monitor::IndexingMonitor;

/// Per-unit configuration handed to [`BackendQueueProcessor::initialize`].
#[derive(Clone)]
pub struct UnitConfig {
    /// Unit being initialized
    pub unit: IndexUnitId,
    /// Directory for file-backed units
    pub index_path: PathBuf,
    /// Writer memory budget in MB
    pub writer_memory_mb: usize,
    /// When applied work is durably committed
    pub commit_policy: CommitPolicy,
    /// Receives failures of work applied off the caller's thread
    pub error_handler: Arc<dyn ErrorHandler>,
}

impl fmt::Debug for UnitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitConfig")
            .field("unit", &self.unit)
            .field("index_path", &self.index_path)
            .field("writer_memory_mb", &self.writer_memory_mb)
            .field("commit_policy", &self.commit_policy)
            .finish_non_exhaustive()
    }
}

impl UnitConfig {
    pub fn new(unit: IndexUnitId, index_path: impl Into<PathBuf>) -> Self {
        Self {
            unit,
            index_path: index_path.into(),
            writer_memory_mb: 50,
            commit_policy: CommitPolicy::default(),
            error_handler: Arc::new(LogErrorHandler),
        }
    }

    /// Build the unit's config; file-backed units live under the base path.
    pub fn from_settings(unit: &IndexUnitId, settings: &Settings) -> Self {
        Self {
            unit: unit.clone(),
            index_path: settings.expanded_index_base_path().join(unit.as_str()),
            writer_memory_mb: settings.writer_memory_mb,
            commit_policy: settings.commit_policy,
            error_handler: Arc::new(LogErrorHandler),
        }
    }

    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn with_commit_policy(mut self, policy: CommitPolicy) -> Self {
        self.commit_policy = policy;
        self
    }
}

/// Trait for applying index operations to one index unit.
pub trait BackendQueueProcessor: Send + Sync {
    /// Prepare the unit; called once before any work is applied.
    fn initialize(&self, config: &UnitConfig) -> Result<(), BackendError>;

    /// Apply one ordered batch as a single change-set.
    ///
    /// Operations must be applied in the given order.
    fn apply_work(
        &self,
        operations: Vec<IndexOperation>,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError>;

    /// Apply a single operation immediately, without batching.
    ///
    /// With `force_async` the call may return before the work is applied.
    fn apply_stream_work(
        &self,
        operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        force_async: bool,
    ) -> Result<(), BackendError>;

    /// Release resources; pending work is applied first.
    fn close(&self) -> Result<(), BackendError>;

    /// Name of this backend for logging.
    fn name(&self) -> &str;

    /// Whether work may be dispatched inside the transaction boundary.
    fn supports_enlistment(&self) -> bool {
        true
    }

    /// Whether this kind of deletion query can be applied.
    fn supports_deletion_query(&self, _kind: DeletionQueryKind) -> bool {
        true
    }
}

/// Creates a processor for a unit.
pub trait BackendFactory: Send + Sync {
    fn create(&self, unit: &IndexUnitId) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&IndexUnitId) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> + Send + Sync,
{
    fn create(&self, unit: &IndexUnitId) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> {
        self(unit)
    }
}

/// Backend factories by selection name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends this crate provides ("blackhole").
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "blackhole",
            |_unit: &IndexUnitId| -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> {
                Ok(Arc::new(BlackholeBackend::new()))
            },
        );
        registry
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: impl BackendFactory + 'static) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create the processor for `unit` using the backend called `name`.
    pub fn create(
        &self,
        name: &str,
        unit: &IndexUnitId,
    ) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackend(name.to_string()))?;
        factory.create(unit)
    }
}

/// Backend that accepts every operation and discards it.
///
/// Useful for measuring the pipeline without index I/O.
#[derive(Debug, Default)]
pub struct BlackholeBackend {
    applied: AtomicU64,
    closed: AtomicBool,
}

impl BlackholeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations accepted so far.
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    fn accept(&self, count: usize) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed("blackhole".to_string()));
        }
        self.applied.fetch_add(count as u64, Ordering::Relaxed);
        Ok(())
    }
}

impl BackendQueueProcessor for BlackholeBackend {
    fn initialize(&self, config: &UnitConfig) -> Result<(), BackendError> {
        debug!(unit = %config.unit, "Blackhole backend initialized, work will be discarded");
        Ok(())
    }

    fn apply_work(
        &self,
        operations: Vec<IndexOperation>,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        self.accept(operations.len())?;
        if let Some(monitor) = monitor {
            monitor.operations_applied(operations.len() as u64);
        }
        Ok(())
    }

    fn apply_stream_work(
        &self,
        _operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        _force_async: bool,
    ) -> Result<(), BackendError> {
        self.accept(1)?;
        if let Some(monitor) = monitor {
            monitor.operations_applied(1);
        }
        Ok(())
    }

    fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        "blackhole"
    }
}
