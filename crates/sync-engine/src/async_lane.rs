//! Background application of index work.
//!
//! An [`AsyncLane`] is one dedicated thread draining a queue of jobs in
//! submission order, so per-unit ordering survives asynchronous execution.
//! [`AsyncBackend`] wraps any processor so that every apply call is handed
//! to its lane and returns immediately.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use sync_types::{DeletionQueryKind, IndexOperation, IndexUnitId};

use crate::backend::{BackendQueueProcessor, UnitConfig};
use crate::error::BackendError;
use crate::error_handler::{ErrorContext, ErrorHandler};
use crate::monitor::IndexingMonitor;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single worker thread applying jobs in order.
pub struct AsyncLane {
    name: String,
    sender: Mutex<Option<UnboundedSender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncLane {
    /// Start the lane thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, BackendError> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(format!("index-lane-{}", name))
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job();
                }
            })
            .map_err(|e| BackendError::Index(format!("failed to start lane thread: {}", e)))?;

        debug!(lane = %name, "Started async lane");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a job behind everything submitted before it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), BackendError> {
        let sender = self
            .sender
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?;
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(job))
                .map_err(|_| BackendError::Closed(self.name.clone())),
            None => Err(BackendError::Closed(self.name.clone())),
        }
    }

    /// Stop accepting jobs, then wait for queued ones to finish.
    pub fn shutdown(&self) -> Result<(), BackendError> {
        self.sender
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?
            .take();
        let handle = self
            .handle
            .lock()
            .map_err(|e| BackendError::LockPoisoned(e.to_string()))?
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(lane = %self.name, "Async lane thread panicked");
            }
            debug!(lane = %self.name, "Async lane drained");
        }
        Ok(())
    }
}

impl Drop for AsyncLane {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Applies a wrapped processor's work on a background lane.
///
/// Failures cannot reach the caller, so they go to the error handler.
pub struct AsyncBackend {
    unit: IndexUnitId,
    inner: Arc<dyn BackendQueueProcessor>,
    lane: AsyncLane,
    error_handler: Arc<dyn ErrorHandler>,
}

impl AsyncBackend {
    pub fn new(
        unit: IndexUnitId,
        inner: Arc<dyn BackendQueueProcessor>,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> Result<Self, BackendError> {
        let lane = AsyncLane::spawn(unit.as_str())?;
        Ok(Self {
            unit,
            inner,
            lane,
            error_handler,
        })
    }

    fn submit(
        &self,
        pending: Pending,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        let unit = self.unit.clone();
        let inner = self.inner.clone();
        let handler = self.error_handler.clone();
        let monitor = monitor.cloned();
        self.lane.submit(move || {
            let (result, operations) = match pending {
                Pending::Batch(operations) => {
                    (inner.apply_work(operations.clone(), monitor.as_ref()), operations)
                }
                Pending::Stream(operation) => (
                    inner.apply_stream_work(operation.clone(), monitor.as_ref(), false),
                    vec![operation],
                ),
            };
            if let Err(error) = result {
                handler.handle(&ErrorContext {
                    unit: &unit,
                    operations: &operations,
                    error: &error,
                });
            }
        })
    }
}

enum Pending {
    Batch(Vec<IndexOperation>),
    Stream(IndexOperation),
}

impl BackendQueueProcessor for AsyncBackend {
    fn initialize(&self, config: &UnitConfig) -> Result<(), BackendError> {
        self.inner.initialize(config)
    }

    fn apply_work(
        &self,
        operations: Vec<IndexOperation>,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
    ) -> Result<(), BackendError> {
        if operations.is_empty() {
            return Ok(());
        }
        self.submit(Pending::Batch(operations), monitor)
    }

    fn apply_stream_work(
        &self,
        operation: IndexOperation,
        monitor: Option<&Arc<dyn IndexingMonitor>>,
        _force_async: bool,
    ) -> Result<(), BackendError> {
        self.submit(Pending::Stream(operation), monitor)
    }

    fn close(&self) -> Result<(), BackendError> {
        self.lane.shutdown()?;
        self.inner.close()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_enlistment(&self) -> bool {
        // Work handed to a lane outlives the transaction boundary.
        false
    }

    fn supports_deletion_query(&self, kind: DeletionQueryKind) -> bool {
        self.inner.supports_deletion_query(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::CollectingErrorHandler;
    use crate::recording::RecordingBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sync_types::EntityKey;

    fn delete(id: &str) -> IndexOperation {
        IndexOperation::Delete {
            key: EntityKey::new("Book", id),
        }
    }

    #[test]
    fn test_lane_runs_jobs_in_order() {
        let lane = AsyncLane::spawn("test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            lane.submit(move || seen.lock().unwrap().push(i)).unwrap();
        }
        lane.shutdown().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_lane_rejects_after_shutdown() {
        let lane = AsyncLane::spawn("closed").unwrap();
        lane.shutdown().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let result = lane.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(matches!(result, Err(BackendError::Closed(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_async_backend_applies_on_close() {
        let inner = Arc::new(RecordingBackend::new());
        let handler = Arc::new(CollectingErrorHandler::new());
        let backend =
            AsyncBackend::new(IndexUnitId::new("Book"), inner.clone(), handler.clone()).unwrap();

        backend.apply_work(vec![delete("1"), delete("2")], None).unwrap();
        backend.apply_stream_work(delete("3"), None, false).unwrap();
        backend.close().unwrap();

        assert_eq!(inner.batches(), vec![vec![delete("1"), delete("2")]]);
        assert_eq!(inner.streamed(), vec![(delete("3"), false)]);
        assert!(inner.is_closed());
        assert!(handler.failures().is_empty());
        assert!(!backend.supports_enlistment());
    }

    #[test]
    fn test_async_backend_reports_failures_to_handler() {
        let inner = Arc::new(RecordingBackend::failing());
        let handler = Arc::new(CollectingErrorHandler::new());
        let backend =
            AsyncBackend::new(IndexUnitId::new("Book"), inner, handler.clone()).unwrap();

        assert!(backend.apply_work(vec![delete("1"), delete("2")], None).is_ok());
        backend.close().unwrap();

        let failures = handler.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].unit, IndexUnitId::new("Book"));
        assert_eq!(failures[0].operations.len(), 2);
    }
}
