//! Per-transaction synchronization: binds a work queue to the host
//! transaction's completion hooks.
//!
//! ```text
//! New --before_completion--> Prepared --after_completion--> Committed | Cancelled --> Consumed
//!  ^                            |
//!  +--------- add_work ---------+
//! ```
//!
//! Where dispatch happens is a [`DispatchPoint`]: coupled synchronizations
//! apply their work in `before_completion`, inside the transaction
//! boundary; deferred ones apply it in `after_completion` after a
//! successful commit. Either way a rollback applies nothing that was not
//! already applied.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info, warn};

use sync_types::WorkItem;

use crate::error::WorkError;
use crate::metadata::EntityRegistry;
use crate::processor::QueueingProcessor;
use crate::queue::WorkQueue;
use crate::registry::SynchronizationRegistry;
use crate::splitter::CommitReport;
use crate::transaction::{TransactionStatus, TransactionSynchronization};

/// Lifecycle state of a synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronizationState {
    New,
    Prepared,
    Committed,
    Cancelled,
    /// Terminal; the synchronization has left the registry
    Consumed,
}

/// When queued work is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPoint {
    /// In `before_completion` (enlisted in the transaction)
    BeforeCompletion,
    /// In `after_completion`, once the commit succeeded
    AfterCompletion,
}

impl DispatchPoint {
    pub fn from_enlistment(enlist_in_transaction: bool) -> Self {
        if enlist_in_transaction {
            DispatchPoint::BeforeCompletion
        } else {
            DispatchPoint::AfterCompletion
        }
    }
}

struct Inner {
    state: SynchronizationState,
    queue: WorkQueue,
    /// Current queue content was handed to the dispatcher
    dispatched: bool,
    /// Some work was applied before the transaction completed
    applied_early: bool,
    outcome: Option<SynchronizationState>,
}

/// Work queue of one transaction plus its lifecycle.
pub struct WorkQueueSynchronization {
    inner: Mutex<Inner>,
    processor: Arc<QueueingProcessor>,
    dispatch_point: DispatchPoint,
    registry: Weak<SynchronizationRegistry>,
    key: usize,
}

impl WorkQueueSynchronization {
    pub fn new(
        entities: Arc<EntityRegistry>,
        processor: Arc<QueueingProcessor>,
        dispatch_point: DispatchPoint,
        registry: Weak<SynchronizationRegistry>,
        key: usize,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SynchronizationState::New,
                queue: WorkQueue::new(entities),
                dispatched: false,
                applied_early: false,
                outcome: None,
            }),
            processor,
            dispatch_point,
            registry,
            key,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, WorkError> {
        self.inner
            .lock()
            .map_err(|e| WorkError::LockPoisoned(e.to_string()))
    }

    pub fn state(&self) -> SynchronizationState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(SynchronizationState::Consumed)
    }

    /// Committed or Cancelled, once the transaction has completed.
    pub fn outcome(&self) -> Option<SynchronizationState> {
        self.inner.lock().ok().and_then(|inner| inner.outcome)
    }

    pub fn dispatch_point(&self) -> DispatchPoint {
        self.dispatch_point
    }

    pub fn pending_size(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.queue.pending_size())
            .unwrap_or(0)
    }

    /// Queue work; a prepared synchronization goes back to New.
    pub fn add_work(&self, item: WorkItem) -> Result<Option<CommitReport>, WorkError> {
        let mut inner = self.lock()?;
        let state = inner.state;
        match state {
            SynchronizationState::New => {}
            SynchronizationState::Prepared => {
                inner.state = SynchronizationState::New;
                inner.dispatched = false;
            }
            _ => return Err(WorkError::SynchronizationCompleted),
        }
        self.processor.add(item, &mut inner.queue)
    }

    /// Dispatch everything queued so far, leaving the queue open.
    pub fn flush_works(&self) -> Result<CommitReport, WorkError> {
        let mut inner = self.lock()?;
        let state = inner.state;
        match state {
            SynchronizationState::New | SynchronizationState::Prepared => {}
            _ => return Err(WorkError::SynchronizationCompleted),
        }
        let mut batch = inner.queue.split_queue();
        inner.state = SynchronizationState::New;
        drop(inner);

        debug!(pending = batch.pending_size(), "Flushing transaction work");
        self.processor.prepare_works(&mut batch);
        self.processor.perform_works(&batch)
    }

    fn deregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.key, self);
        }
    }
}

impl TransactionSynchronization for WorkQueueSynchronization {
    fn before_completion(&self) -> Result<(), WorkError> {
        let mut inner = self.lock()?;
        let state = inner.state;
        match state {
            SynchronizationState::New => {
                self.processor.prepare_works(&mut inner.queue);
                inner.state = SynchronizationState::Prepared;
            }
            SynchronizationState::Prepared => {}
            state => {
                warn!(state = ?state, "before_completion on a completed synchronization");
                return Ok(());
            }
        }

        if self.dispatch_point == DispatchPoint::BeforeCompletion && !inner.dispatched {
            inner.dispatched = true;
            inner.applied_early = true;
            let result = self.processor.perform_works(&inner.queue);
            // Applied work must not be applied again if more is added.
            inner.queue.clear();
            let report = result?;
            debug!(
                units = report.units,
                operations = report.operations,
                "Applied work inside transaction"
            );
        }
        Ok(())
    }

    fn after_completion(&self, status: TransactionStatus) -> Result<(), WorkError> {
        let mut inner = self.lock()?;
        if matches!(
            inner.state,
            SynchronizationState::Committed
                | SynchronizationState::Cancelled
                | SynchronizationState::Consumed
        ) {
            debug!(status = ?status, "after_completion on a completed synchronization");
            return Ok(());
        }

        let result = if status == TransactionStatus::Committed {
            if inner.state == SynchronizationState::New {
                self.processor.prepare_works(&mut inner.queue);
            }
            inner.state = SynchronizationState::Committed;
            if inner.dispatched {
                Ok(())
            } else {
                inner.dispatched = true;
                self.processor.perform_works(&inner.queue).map(|report| {
                    info!(
                        units = report.units,
                        operations = report.operations,
                        "Applied committed transaction work"
                    );
                })
            }
        } else {
            if inner.applied_early {
                warn!(status = ?status, "Transaction ended without commit after its work was applied");
            }
            self.processor.cancel_works(&mut inner.queue);
            inner.state = SynchronizationState::Cancelled;
            Ok(())
        };

        let outcome = inner.state;
        inner.outcome = Some(outcome);
        inner.state = SynchronizationState::Consumed;
        drop(inner);
        self.deregister();
        result
    }
}
