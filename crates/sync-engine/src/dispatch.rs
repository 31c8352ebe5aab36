//! Dispatchers: route sealed operations and hand them to unit processors.
//!
//! Both modes share [`route`]; they differ in what happens to a target.
//! The transactional dispatcher groups targets into per-unit batches and
//! commits once. The streaming dispatcher applies each target right away.

use std::sync::Arc;

use tracing::{debug, info};

use sync_types::IndexOperation;

use crate::error::{CommitFailure, UnitFailure, WorkError};
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::metadata::EntityRegistry;
use crate::monitor::IndexingMonitor;
use crate::routing::route;
use crate::splitter::{CommitReport, PerIndexSplitter, UnitFilter};
use crate::units::IndexUnitRegistry;

/// Applies operations one at a time, without batching.
pub struct StreamingDispatcher {
    registry: Arc<EntityRegistry>,
    units: Arc<IndexUnitRegistry>,
    filter: Option<UnitFilter>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl StreamingDispatcher {
    pub fn new(
        registry: Arc<EntityRegistry>,
        units: Arc<IndexUnitRegistry>,
        filter: Option<UnitFilter>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            registry,
            units,
            filter,
            error_handler,
        }
    }

    /// Route one operation and apply it to every target unit.
    ///
    /// With `force_async` the backends may return before the work is
    /// applied. All targets are attempted before failures are surfaced.
    pub fn dispatch(
        &self,
        operation: &IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        force_async: bool,
    ) -> Result<CommitReport, WorkError> {
        // Resolve every target before applying to any of them.
        let mut resolved = Vec::new();
        for target in route(operation, &self.registry)?.into_targets() {
            if let Some(filter) = &self.filter {
                if !filter(&target.unit) {
                    debug!(unit = %target.unit, "Unit filtered out");
                    continue;
                }
            }
            let processor = self
                .units
                .get(&target.unit)
                .ok_or_else(|| WorkError::UnknownIndexUnit(target.unit.clone()))?;
            resolved.push((target, processor));
        }

        let mut report = CommitReport::default();
        let mut failure = CommitFailure::new();
        for (target, processor) in resolved {
            match processor.apply_stream_work(target.operation.clone(), monitor, force_async) {
                Ok(()) => {
                    report.units += 1;
                    report.operations += 1;
                }
                Err(error) => {
                    let unit_failure = UnitFailure {
                        unit: target.unit,
                        operations: vec![target.operation],
                        error,
                    };
                    self.error_handler
                        .handle(&ErrorContext::from_failure(&unit_failure));
                    failure.record(unit_failure);
                }
            }
        }

        debug!(operation = %operation, units = report.units, force_async, "Streamed operation");
        Ok(failure.into_report(report)?)
    }
}

/// Batches a sealed operation list per unit and commits it once.
pub struct TransactionalDispatcher {
    registry: Arc<EntityRegistry>,
    units: Arc<IndexUnitRegistry>,
    filter: Option<UnitFilter>,
    error_handler: Arc<dyn ErrorHandler>,
    streaming: Arc<StreamingDispatcher>,
}

impl TransactionalDispatcher {
    pub fn new(
        registry: Arc<EntityRegistry>,
        units: Arc<IndexUnitRegistry>,
        filter: Option<UnitFilter>,
        error_handler: Arc<dyn ErrorHandler>,
        streaming: Arc<StreamingDispatcher>,
    ) -> Self {
        Self {
            registry,
            units,
            filter,
            error_handler,
            streaming,
        }
    }

    /// Route every operation, then commit one batch per unit.
    ///
    /// Maintenance operations skip the batches and are streamed after the
    /// commit. A routing error aborts before anything is applied.
    pub fn dispatch(
        &self,
        operations: &[IndexOperation],
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<CommitReport, WorkError> {
        let mut splitter = PerIndexSplitter::new(
            self.units.clone(),
            self.filter.clone(),
            self.error_handler.clone(),
        );
        let mut maintenance = Vec::new();

        for operation in operations {
            if operation.is_maintenance() {
                maintenance.push(operation);
                continue;
            }
            for target in route(operation, &self.registry)?.into_targets() {
                splitter.route_into(target.unit, target.operation)?;
            }
        }

        let mut failure = CommitFailure::new();
        let mut report = match splitter.commit(monitor) {
            Ok(report) => report,
            Err(mut commit_failure) => {
                let partial = std::mem::take(&mut commit_failure.applied);
                failure.merge(commit_failure);
                partial
            }
        };

        for operation in maintenance {
            match self.streaming.dispatch(operation, monitor, false) {
                Ok(streamed) => report.merge(streamed),
                Err(WorkError::Commit(mut streamed)) => {
                    report.merge(std::mem::take(&mut streamed.applied));
                    failure.merge(streamed);
                }
                Err(other) => return Err(other),
            }
        }

        info!(
            operations = operations.len(),
            units = report.units,
            failed = failure.failures.len(),
            "Dispatched work"
        );
        Ok(failure.into_report(report)?)
    }
}
