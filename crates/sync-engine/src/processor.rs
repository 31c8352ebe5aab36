//! Queueing processor: the batching policy in front of the dispatcher.

use std::sync::Arc;

use tracing::debug;

use sync_types::WorkItem;

use crate::dispatch::TransactionalDispatcher;
use crate::error::WorkError;
use crate::monitor::IndexingMonitor;
use crate::queue::WorkQueue;
use crate::splitter::CommitReport;

/// Accepts work into queues and dispatches them, flushing early once a
/// queue reaches the batch size.
pub struct QueueingProcessor {
    batch_size: usize,
    dispatcher: Arc<TransactionalDispatcher>,
    monitor: Option<Arc<dyn IndexingMonitor>>,
}

impl QueueingProcessor {
    /// `batch_size` of 0 disables early flushing.
    pub fn new(
        batch_size: usize,
        dispatcher: Arc<TransactionalDispatcher>,
        monitor: Option<Arc<dyn IndexingMonitor>>,
    ) -> Self {
        Self {
            batch_size,
            dispatcher,
            monitor,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Add work to the queue.
    ///
    /// Returns the report of the sub-batch when the threshold triggered an
    /// early dispatch.
    pub fn add(&self, item: WorkItem, queue: &mut WorkQueue) -> Result<Option<CommitReport>, WorkError> {
        queue.add(item);
        if self.batch_size == 0 || queue.pending_size() < self.batch_size {
            return Ok(None);
        }

        debug!(
            pending = queue.pending_size(),
            batch_size = self.batch_size,
            "Batch size reached, dispatching sub-batch"
        );
        let mut batch = queue.split_queue();
        self.prepare_works(&mut batch);
        self.perform_works(&batch).map(Some)
    }

    pub fn prepare_works(&self, queue: &mut WorkQueue) {
        queue.seal_work_plan();
    }

    /// Dispatch the sealed queue.
    ///
    /// # Panics
    ///
    /// Panics if the queue was not prepared.
    pub fn perform_works(&self, queue: &WorkQueue) -> Result<CommitReport, WorkError> {
        let operations = queue.sealed_queue();
        if operations.is_empty() {
            return Ok(CommitReport::default());
        }
        self.dispatcher.dispatch(operations, self.monitor.as_ref())
    }

    /// Discard the queue without applying anything.
    pub fn cancel_works(&self, queue: &mut WorkQueue) {
        debug!(pending = queue.pending_size(), "Cancelling queued work");
        queue.clear();
    }
}
