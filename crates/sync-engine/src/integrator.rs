//! Assembles the pipeline from settings and entity bindings.
//!
//! All setup problems (unknown backend, unsupported deletion query,
//! enlistment against a backend that cannot enlist, failed unit
//! initialization) surface from [`SearchIntegratorBuilder::build`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use sync_types::{
    ConfigError, DeletionQueryKind, EntityType, ExecutionMode, IndexOperation, IndexUnitId,
    Settings, DEFAULT_WORKER_SCOPE,
};

use crate::async_lane::AsyncBackend;
use crate::backend::{BackendQueueProcessor, BackendRegistry, UnitConfig};
use crate::bulk::{BulkIndexConfig, BulkIndexer};
use crate::dispatch::{StreamingDispatcher, TransactionalDispatcher};
use crate::error::WorkError;
use crate::error_handler::{ErrorHandler, LogErrorHandler};
use crate::metadata::{ContainmentGraph, EntityBinding, EntityRegistry};
use crate::monitor::IndexingMonitor;
use crate::processor::QueueingProcessor;
use crate::splitter::{CommitReport, UnitFilter};
use crate::synchronization::DispatchPoint;
use crate::units::IndexUnitRegistry;
use crate::worker::{TransactionalWorker, Worker};

/// Builder for [`SearchIntegrator`].
pub struct SearchIntegratorBuilder {
    settings: Settings,
    bindings: Vec<EntityBinding>,
    backends: BackendRegistry,
    custom_worker: Option<(String, Arc<dyn Worker>)>,
    error_handler: Arc<dyn ErrorHandler>,
    containment: Option<Arc<dyn ContainmentGraph>>,
    monitor: Option<Arc<dyn IndexingMonitor>>,
}

impl SearchIntegratorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            bindings: Vec::new(),
            backends: BackendRegistry::with_builtins(),
            custom_worker: None,
            error_handler: Arc::new(LogErrorHandler),
            containment: None,
            monitor: None,
        }
    }

    pub fn bind(mut self, binding: EntityBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Replace the backend registry (built-ins are lost unless re-added).
    pub fn backends(mut self, backends: BackendRegistry) -> Self {
        self.backends = backends;
        self
    }

    /// Mutable access to the backend registry, for adding factories.
    pub fn backends_mut(&mut self) -> &mut BackendRegistry {
        &mut self.backends
    }

    /// Worker used when `worker_scope` equals `name`.
    pub fn custom_worker(mut self, name: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.custom_worker = Some((name.into(), worker));
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = handler;
        self
    }

    pub fn containment(mut self, graph: Arc<dyn ContainmentGraph>) -> Self {
        self.containment = Some(graph);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn IndexingMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn build(self) -> Result<SearchIntegrator, ConfigError> {
        let settings = self.settings;
        settings.validate()?;
        let deletion_kinds = settings.deletion_query_kinds()?;
        let custom_worker = match self.custom_worker {
            _ if settings.worker_scope == DEFAULT_WORKER_SCOPE => None,
            Some((name, worker)) if name == settings.worker_scope => Some(worker),
            _ => return Err(ConfigError::UnknownWorkerScope(settings.worker_scope.clone())),
        };

        let mut entities = EntityRegistry::builder().with_settings(&settings);
        for binding in self.bindings {
            entities = entities.bind(binding);
        }
        if let Some(graph) = self.containment {
            entities = entities.containment(graph);
        }
        let entities = Arc::new(entities.build());

        for entity_type in entities.indexed_types() {
            if entities.strategy(entity_type).map_or(true, |s| s.all_units().is_empty()) {
                return Err(ConfigError::NoIndexUnits(entity_type.to_string()));
            }
        }
        let unit_ids = entities.all_units();
        if unit_ids.is_empty() {
            return Err(ConfigError::NoIndexUnits("<no indexed types>".to_string()));
        }

        let mut units = IndexUnitRegistry::new();
        for unit in &unit_ids {
            let created = create_unit(
                unit,
                &settings,
                &self.backends,
                &deletion_kinds,
                &self.error_handler,
            );
            match created {
                Ok(processor) => units.insert(unit.clone(), processor),
                Err(e) => {
                    // Release the units that did start.
                    if let Err(close_error) = units.close_all() {
                        warn!(error = %close_error, "Failed to close units after setup error");
                    }
                    return Err(e);
                }
            }
        }
        let units = Arc::new(units);

        let filter: Option<UnitFilter> = settings.unit_namespace.clone().map(|namespace| {
            Arc::new(move |unit: &IndexUnitId| unit.as_str().starts_with(namespace.as_str()))
                as UnitFilter
        });

        let streaming = Arc::new(StreamingDispatcher::new(
            entities.clone(),
            units.clone(),
            filter.clone(),
            self.error_handler.clone(),
        ));
        let transactional = Arc::new(TransactionalDispatcher::new(
            entities.clone(),
            units.clone(),
            filter,
            self.error_handler.clone(),
            streaming.clone(),
        ));
        let processor = Arc::new(QueueingProcessor::new(
            settings.batch_size,
            transactional.clone(),
            self.monitor.clone(),
        ));

        let worker: Arc<dyn Worker> = match custom_worker {
            Some(worker) => worker,
            None => Arc::new(TransactionalWorker::new(
                entities.clone(),
                processor,
                DispatchPoint::from_enlistment(settings.enlist_in_transaction),
            )),
        };

        info!(
            units = unit_ids.len(),
            backend = %settings.backend,
            execution = ?settings.execution,
            worker_scope = %settings.worker_scope,
            "Search integrator started"
        );

        Ok(SearchIntegrator {
            settings,
            entities,
            units,
            worker,
            transactional,
            streaming,
            monitor: self.monitor,
            closed: AtomicBool::new(false),
        })
    }
}

fn create_unit(
    unit: &IndexUnitId,
    settings: &Settings,
    backends: &BackendRegistry,
    deletion_kinds: &[DeletionQueryKind],
    error_handler: &Arc<dyn ErrorHandler>,
) -> Result<Arc<dyn BackendQueueProcessor>, ConfigError> {
    let mut processor = backends.create(&settings.backend, unit)?;
    if settings.execution == ExecutionMode::Async {
        let wrapped = AsyncBackend::new(unit.clone(), processor, error_handler.clone())
            .map_err(|e| ConfigError::UnitInitialization {
                unit: unit.to_string(),
                reason: e.to_string(),
            })?;
        processor = Arc::new(wrapped);
    }

    for kind in deletion_kinds {
        if !processor.supports_deletion_query(*kind) {
            return Err(ConfigError::UnsupportedDeletionQuery {
                kind: kind.as_str().to_string(),
                backend: settings.backend.clone(),
            });
        }
    }
    if settings.enlist_in_transaction && !processor.supports_enlistment() {
        return Err(ConfigError::EnlistmentNotSupported(settings.backend.clone()));
    }

    let config = UnitConfig::from_settings(unit, settings).with_error_handler(error_handler.clone());
    processor
        .initialize(&config)
        .map_err(|e| ConfigError::UnitInitialization {
            unit: unit.to_string(),
            reason: e.to_string(),
        })?;
    debug!(unit = %unit, backend = processor.name(), "Index unit ready");
    Ok(processor)
}

/// The assembled pipeline.
pub struct SearchIntegrator {
    settings: Settings,
    entities: Arc<EntityRegistry>,
    units: Arc<IndexUnitRegistry>,
    worker: Arc<dyn Worker>,
    transactional: Arc<TransactionalDispatcher>,
    streaming: Arc<StreamingDispatcher>,
    monitor: Option<Arc<dyn IndexingMonitor>>,
    closed: AtomicBool,
}

impl SearchIntegrator {
    pub fn builder(settings: Settings) -> SearchIntegratorBuilder {
        SearchIntegratorBuilder::new(settings)
    }

    /// The shared worker for submitting work.
    pub fn worker(&self) -> Arc<dyn Worker> {
        self.worker.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn entities(&self) -> &Arc<EntityRegistry> {
        &self.entities
    }

    pub fn units(&self) -> &Arc<IndexUnitRegistry> {
        &self.units
    }

    /// Merge segments of one type's units, or of every unit.
    pub fn optimize(&self, entity_type: Option<&EntityType>) -> Result<CommitReport, WorkError> {
        self.stream(
            IndexOperation::Optimize {
                entity_type: entity_type.cloned(),
            },
            false,
        )
    }

    /// Make everything applied so far durable.
    pub fn flush_to_indexes(&self) -> Result<CommitReport, WorkError> {
        self.stream(IndexOperation::Flush { entity_type: None }, false)
    }

    /// Remove every document of the type now, outside any transaction.
    pub fn purge_all_now(&self, entity_type: &EntityType) -> Result<CommitReport, WorkError> {
        self.stream(
            IndexOperation::PurgeAll {
                entity_type: entity_type.clone(),
                tenant: None,
            },
            false,
        )
    }

    /// Apply one operation immediately.
    pub fn stream(&self, operation: IndexOperation, force_async: bool) -> Result<CommitReport, WorkError> {
        self.streaming
            .dispatch(&operation, self.monitor.as_ref(), force_async)
    }

    /// Bulk loader sharing this integrator's units.
    pub fn bulk_indexer(&self, config: BulkIndexConfig) -> BulkIndexer {
        BulkIndexer::new(
            self.entities.clone(),
            self.transactional.clone(),
            self.streaming.clone(),
            self.monitor.clone(),
            config,
        )
    }

    /// Close the worker and every unit. Later calls do nothing.
    pub fn close(&self) -> Result<(), WorkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.worker.close();
        self.units.close_all()?;
        info!("Search integrator closed");
        Ok(())
    }
}

impl Drop for SearchIntegrator {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                warn!(error = %e, "Failed to close search integrator on drop");
            }
        }
    }
}
