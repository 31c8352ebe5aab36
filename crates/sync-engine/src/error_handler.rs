//! Handlers notified of per-unit apply failures.
//!
//! Synchronous callers also receive the failures as a [`CommitFailure`];
//! asynchronous applies report only through the handler.
//!
//! [`CommitFailure`]: crate::error::CommitFailure

use std::sync::Mutex;

use tracing::error;

use sync_types::{IndexOperation, IndexUnitId};

use crate::error::{BackendError, UnitFailure};

/// What failed, where.
#[derive(Debug)]
pub struct ErrorContext<'a> {
    pub unit: &'a IndexUnitId,
    pub operations: &'a [IndexOperation],
    pub error: &'a BackendError,
}

impl<'a> ErrorContext<'a> {
    pub fn from_failure(failure: &'a UnitFailure) -> Self {
        Self {
            unit: &failure.unit,
            operations: &failure.operations,
            error: &failure.error,
        }
    }
}

/// Receives every per-unit failure.
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, context: &ErrorContext<'_>);
}

/// Default handler: logs the failure.
pub struct LogErrorHandler;

impl ErrorHandler for LogErrorHandler {
    fn handle(&self, context: &ErrorContext<'_>) {
        let first = context.operations.first().map(|op| op.to_string());
        error!(
            unit = %context.unit,
            operations = context.operations.len(),
            first_operation = ?first,
            error = %context.error,
            "Failed to apply index work"
        );
    }
}

/// Handler that keeps failures for later inspection.
#[derive(Default)]
pub struct CollectingErrorHandler {
    failures: Mutex<Vec<UnitFailure>>,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<UnitFailure> {
        self.failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn handle(&self, context: &ErrorContext<'_>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(UnitFailure {
                unit: context.unit.clone(),
                operations: context.operations.to_vec(),
                error: context.error.clone(),
            });
        }
    }
}
