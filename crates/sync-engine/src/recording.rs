//! Recording backend for tests and dry runs.
//!
//! Keeps every batch and stream operation it receives and can be told to
//! fail, so callers can observe routing and partial-failure behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use sync_types::{DeletionQueryKind, IndexOperation};

use crate::backend::{BackendQueueProcessor, UnitConfig};
use crate::error::BackendError;
use crate::monitor::IndexingMonitor;

/// Backend that records what it is asked to apply.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    batches: Mutex<Vec<Vec<IndexOperation>>>,
    streamed: Mutex<Vec<(IndexOperation, bool)>>,
    failing: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
    enlistment: bool,
    unsupported_queries: Vec<DeletionQueryKind>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            enlistment: true,
            ..Self::default()
        }
    }

    /// A backend whose every apply call fails.
    pub fn failing() -> Self {
        let backend = Self::new();
        backend.set_failing(true);
        backend
    }

    /// A backend that refuses to take part in transactions.
    pub fn without_enlistment() -> Self {
        Self {
            enlistment: false,
            ..Self::default()
        }
    }

    pub fn without_deletion_query(mut self, kind: DeletionQueryKind) -> Self {
        self.unsupported_queries.push(kind);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Batches received through `apply_work`, in call order.
    pub fn batches(&self) -> Vec<Vec<IndexOperation>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Operations received through `apply_stream_work`, with their async flag.
    pub fn streamed(&self) -> Vec<(IndexOperation, bool)> {
        self.streamed.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// All operations received, batches first.
    pub fn operations(&self) -> Vec<IndexOperation> {
        let mut all: Vec<IndexOperation> = self.batches().into_iter().flatten().collect();
        all.extend(self.streamed().into_iter().map(|(op, _)| op));
        all
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(BackendError::Index("recording backend set to fail".to_string()));
        }
        Ok(())
    }
}

impl BackendQueueProcessor for RecordingBackend {
    fn initialize(&self, _config: &UnitConfig) -> Result<(), BackendError> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn apply_work(
        &self,
        operations: Vec<IndexOperation>,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        self.check()?;
        if let Some(monitor) = monitor {
            monitor.operations_applied(operations.len() as u64);
        }
        self.batches
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?
            .push(operations);
        Ok(())
    }

    fn apply_stream_work(
        &self,
        operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        force_async: bool,
    ) -> Result<(), BackendError> {
        self.check()?;
        if let Some(monitor) = monitor {
            monitor.operations_applied(1);
        }
        self.streamed
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?
            .push((operation, force_async));
        Ok(())
    }

    fn close(&self) -> Result<(), BackendError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn supports_enlistment(&self) -> bool {
        self.enlistment
    }

    fn supports_deletion_query(&self, kind: DeletionQueryKind) -> bool {
        !self.unsupported_queries.contains(&kind)
    }
}
