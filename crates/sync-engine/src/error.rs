//! Error types for the work pipeline.

use std::fmt;

use sync_types::{ConfigError, EntityType, IndexOperation, IndexUnitId};
use thiserror::Error;

use crate::splitter::CommitReport;

/// Errors raised by a backend queue processor.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Work arrived before `initialize` was called
    #[error("Backend not initialized: {0}")]
    NotInitialized(String),

    /// Work arrived after `close` was called
    #[error("Backend closed: {0}")]
    Closed(String),

    /// The backend cannot apply this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The underlying index failed
    #[error("Index error: {0}")]
    Index(String),

    /// A lock guarding backend state was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Failure of one index unit during a commit cycle.
#[derive(Debug, Clone)]
pub struct UnitFailure {
    /// Unit whose apply call failed
    pub unit: IndexUnitId,
    /// Operations the unit was asked to apply
    pub operations: Vec<IndexOperation>,
    /// Cause reported by the backend
    pub error: BackendError,
}

/// Aggregate of per-unit failures, surfaced after every unit was attempted.
#[derive(Debug, Clone, Default)]
pub struct CommitFailure {
    pub failures: Vec<UnitFailure>,
    /// What the units that did succeed applied
    pub applied: CommitReport,
}

impl CommitFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, failure: UnitFailure) {
        self.failures.push(failure);
    }

    pub fn merge(&mut self, other: CommitFailure) {
        self.failures.extend(other.failures);
        self.applied.merge(other.applied);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Units that failed, in the order they were attempted.
    pub fn failed_units(&self) -> Vec<&IndexUnitId> {
        self.failures.iter().map(|f| &f.unit).collect()
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<(), CommitFailure> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// `Ok(applied)` when nothing failed, otherwise the failure carrying
    /// `applied` as the partial report.
    pub fn into_report(mut self, applied: CommitReport) -> Result<CommitReport, CommitFailure> {
        if self.is_empty() {
            Ok(applied)
        } else {
            self.applied = applied;
            Err(self)
        }
    }
}

impl fmt::Display for CommitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} index unit(s) failed", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(
                f,
                "{}{} ({} operations): {}",
                sep,
                failure.unit,
                failure.operations.len(),
                failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for CommitFailure {}

/// Errors that can occur while submitting or dispatching work.
#[derive(Error, Debug)]
pub enum WorkError {
    /// Work was submitted for a type that is neither indexed nor contained in one
    #[error("Entity type '{0}' is neither indexed nor contained in an indexed type")]
    NotIndexable(EntityType),

    /// One or more index units failed to apply their batch
    #[error("Commit failed: {0}")]
    Commit(#[from] CommitFailure),

    /// A single backend call failed outside a commit cycle
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Setup-time configuration problem
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A routing strategy produced a unit that is not registered
    #[error("Unknown index unit: {0}")]
    UnknownIndexUnit(IndexUnitId),

    /// Work arrived for a transaction whose synchronization already completed
    #[error("Synchronization already completed for this transaction")]
    SynchronizationCompleted,

    /// A lock guarding pipeline state was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}
