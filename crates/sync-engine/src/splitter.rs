//! Groups routed operations into one ordered batch per index unit and
//! commits each batch with a single `apply_work` call.
//!
//! Units commit independently: a failing unit does not stop the others,
//! and its failure is reported once every unit has been attempted.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use sync_types::{IndexOperation, IndexUnitId};

use crate::error::{CommitFailure, UnitFailure, WorkError};
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::monitor::IndexingMonitor;
use crate::units::IndexUnitRegistry;

/// Predicate selecting the units this process may write to.
pub type UnitFilter = Arc<dyn Fn(&IndexUnitId) -> bool + Send + Sync>;

/// Counts of what a dispatch applied successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Units whose apply call succeeded
    pub units: usize,
    /// Operations those units applied
    pub operations: usize,
}

impl CommitReport {
    pub fn merge(&mut self, other: CommitReport) {
        self.units += other.units;
        self.operations += other.operations;
    }
}

/// Per-unit batches for one commit cycle.
pub struct PerIndexSplitter {
    units: Arc<IndexUnitRegistry>,
    filter: Option<UnitFilter>,
    error_handler: Arc<dyn ErrorHandler>,
    batches: Vec<(IndexUnitId, Vec<IndexOperation>)>,
    positions: HashMap<IndexUnitId, usize>,
}

impl PerIndexSplitter {
    pub fn new(
        units: Arc<IndexUnitRegistry>,
        filter: Option<UnitFilter>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Self {
        Self {
            units,
            filter,
            error_handler,
            batches: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Append an operation to the unit's batch.
    ///
    /// Units rejected by the filter are dropped silently.
    pub fn route_into(&mut self, unit: IndexUnitId, operation: IndexOperation) -> Result<(), WorkError> {
        if let Some(filter) = &self.filter {
            if !filter(&unit) {
                debug!(unit = %unit, operation = %operation, "Unit filtered out");
                return Ok(());
            }
        }
        if !self.units.contains(&unit) {
            return Err(WorkError::UnknownIndexUnit(unit));
        }

        match self.positions.get(&unit) {
            Some(&index) => self.batches[index].1.push(operation),
            None => {
                self.positions.insert(unit.clone(), self.batches.len());
                self.batches.push((unit, vec![operation]));
            }
        }
        Ok(())
    }

    /// Number of units with a batch.
    pub fn unit_count(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Apply every batch, one `apply_work` call per unit.
    pub fn commit(
        self,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<CommitReport, CommitFailure> {
        let mut report = CommitReport::default();
        let mut failure = CommitFailure::new();

        for (unit, operations) in self.batches {
            // Filter and membership were checked in route_into.
            let Some(processor) = self.units.get(&unit) else {
                continue;
            };
            let count = operations.len();
            match processor.apply_work(operations.clone(), monitor) {
                Ok(()) => {
                    debug!(unit = %unit, operations = count, "Applied batch");
                    report.units += 1;
                    report.operations += count;
                }
                Err(error) => {
                    let unit_failure = UnitFailure {
                        unit,
                        operations,
                        error,
                    };
                    self.error_handler
                        .handle(&ErrorContext::from_failure(&unit_failure));
                    failure.record(unit_failure);
                }
            }
        }

        info!(
            units = report.units,
            operations = report.operations,
            failed = failure.failures.len(),
            "Committed per-unit batches"
        );
        failure.into_report(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::CollectingErrorHandler;
    use crate::recording::RecordingBackend;
    use pretty_assertions::assert_eq;
    use sync_types::EntityKey;

    fn delete(id: &str) -> IndexOperation {
        IndexOperation::Delete {
            key: EntityKey::new("Book", id),
        }
    }

    struct Fixture {
        a: Arc<RecordingBackend>,
        b: Arc<RecordingBackend>,
        units: Arc<IndexUnitRegistry>,
        handler: Arc<CollectingErrorHandler>,
    }

    fn fixture(b: RecordingBackend) -> Fixture {
        let a = Arc::new(RecordingBackend::new());
        let b = Arc::new(b);
        let mut units = IndexUnitRegistry::new();
        units.insert(IndexUnitId::new("a"), a.clone());
        units.insert(IndexUnitId::new("b"), b.clone());
        Fixture {
            a,
            b,
            units: Arc::new(units),
            handler: Arc::new(CollectingErrorHandler::new()),
        }
    }

    #[test]
    fn test_groups_by_unit_in_order() {
        let f = fixture(RecordingBackend::new());
        let mut splitter = PerIndexSplitter::new(f.units.clone(), None, f.handler.clone());
        splitter.route_into(IndexUnitId::new("a"), delete("1")).unwrap();
        splitter.route_into(IndexUnitId::new("b"), delete("2")).unwrap();
        splitter.route_into(IndexUnitId::new("a"), delete("3")).unwrap();
        assert_eq!(splitter.unit_count(), 2);

        let report = splitter.commit(None).unwrap();
        assert_eq!(report, CommitReport { units: 2, operations: 3 });
        assert_eq!(f.a.batches(), vec![vec![delete("1"), delete("3")]]);
        assert_eq!(f.b.batches(), vec![vec![delete("2")]]);
    }

    #[test]
    fn test_failure_is_isolated_per_unit() {
        let f = fixture(RecordingBackend::failing());
        let mut splitter = PerIndexSplitter::new(f.units.clone(), None, f.handler.clone());
        splitter.route_into(IndexUnitId::new("b"), delete("1")).unwrap();
        splitter.route_into(IndexUnitId::new("a"), delete("2")).unwrap();

        let failure = splitter.commit(None).unwrap_err();
        assert_eq!(failure.failed_units(), vec![&IndexUnitId::new("b")]);
        assert_eq!(failure.failures[0].operations, vec![delete("1")]);
        assert_eq!(f.a.batches(), vec![vec![delete("2")]]);
        assert!(f.b.batches().is_empty());
        assert_eq!(f.handler.failures().len(), 1);
    }

    #[test]
    fn test_filtered_units_are_dropped() {
        let f = fixture(RecordingBackend::new());
        let filter: UnitFilter = Arc::new(|unit: &IndexUnitId| unit.as_str() == "a");
        let mut splitter = PerIndexSplitter::new(f.units.clone(), Some(filter), f.handler.clone());
        splitter.route_into(IndexUnitId::new("b"), delete("1")).unwrap();
        splitter.route_into(IndexUnitId::new("zzz"), delete("2")).unwrap();
        assert!(splitter.is_empty());
        splitter.commit(None).unwrap();
        assert!(f.b.batches().is_empty());
    }

    #[test]
    fn test_unknown_unit_is_an_error() {
        let f = fixture(RecordingBackend::new());
        let mut splitter = PerIndexSplitter::new(f.units.clone(), None, f.handler.clone());
        let err = splitter
            .route_into(IndexUnitId::new("c"), delete("1"))
            .unwrap_err();
        assert!(matches!(err, WorkError::UnknownIndexUnit(unit) if unit.as_str() == "c"));
    }
}
