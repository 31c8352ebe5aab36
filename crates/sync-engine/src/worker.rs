//! Workers: the entry point for submitted work.
//!
//! A single [`TransactionalWorker`] is shared by every application thread.
//! Inside a transaction it queues work on that transaction's
//! synchronization; outside one it applies the work right away.

use std::sync::Arc;

use tracing::{debug, info, warn};

use sync_types::WorkItem;

use crate::error::WorkError;
use crate::interceptor::intercept;
use crate::metadata::EntityRegistry;
use crate::processor::QueueingProcessor;
use crate::queue::WorkQueue;
use crate::registry::SynchronizationRegistry;
use crate::synchronization::{DispatchPoint, WorkQueueSynchronization};
use crate::transaction::TransactionContext;

/// Accepts work items from domain-event sources.
pub trait Worker: Send + Sync {
    /// Submit one item in the caller's transaction context.
    fn perform_work(&self, item: WorkItem, context: &dyn TransactionContext) -> Result<(), WorkError>;

    /// Apply the work queued so far in the current transaction.
    fn flush_works(&self, context: &dyn TransactionContext) -> Result<(), WorkError>;

    fn close(&self);
}

/// Default worker, binding work to host transactions.
pub struct TransactionalWorker {
    entities: Arc<EntityRegistry>,
    processor: Arc<QueueingProcessor>,
    synchronizations: Arc<SynchronizationRegistry>,
    dispatch_point: DispatchPoint,
}

impl TransactionalWorker {
    pub fn new(
        entities: Arc<EntityRegistry>,
        processor: Arc<QueueingProcessor>,
        dispatch_point: DispatchPoint,
    ) -> Self {
        Self {
            entities,
            processor,
            synchronizations: Arc::new(SynchronizationRegistry::new()),
            dispatch_point,
        }
    }

    pub fn synchronizations(&self) -> &Arc<SynchronizationRegistry> {
        &self.synchronizations
    }

    fn synchronization_for(
        &self,
        context: &dyn TransactionContext,
    ) -> Option<Arc<WorkQueueSynchronization>> {
        if !context.is_transaction_in_progress() {
            return None;
        }
        let id = context.transaction_identifier()?;
        let (synchronization, created) = self.synchronizations.get_or_create(&id, |key| {
            Arc::new(WorkQueueSynchronization::new(
                self.entities.clone(),
                self.processor.clone(),
                self.dispatch_point,
                Arc::downgrade(&self.synchronizations),
                key,
            ))
        });
        if created {
            debug!(dispatch_point = ?self.dispatch_point, "Registered synchronization for transaction");
            context.register_synchronization(synchronization.clone());
        }
        Some(synchronization)
    }
}

impl Worker for TransactionalWorker {
    fn perform_work(&self, item: WorkItem, context: &dyn TransactionContext) -> Result<(), WorkError> {
        let entity_type = item.entity_type();
        if !self.entities.is_indexable(entity_type) {
            return Err(WorkError::NotIndexable(entity_type.clone()));
        }

        let interceptor = self
            .entities
            .binding(entity_type)
            .and_then(|b| b.interceptor())
            .cloned();
        let item = match interceptor {
            Some(interceptor) => match intercept(&*interceptor, item) {
                Some(item) => item,
                None => return Ok(()),
            },
            None => item,
        };

        if let Some(synchronization) = self.synchronization_for(context) {
            synchronization.add_work(item)?;
            return Ok(());
        }

        let mut queue = WorkQueue::new(self.entities.clone());
        self.processor.add(item, &mut queue)?;
        self.processor.prepare_works(&mut queue);
        self.processor.perform_works(&queue)?;
        Ok(())
    }

    fn flush_works(&self, context: &dyn TransactionContext) -> Result<(), WorkError> {
        if !context.is_transaction_in_progress() {
            return Ok(());
        }
        let Some(id) = context.transaction_identifier() else {
            return Ok(());
        };
        match self.synchronizations.get(&id) {
            Some(synchronization) => {
                let report = synchronization.flush_works()?;
                info!(units = report.units, operations = report.operations, "Flushed transaction work");
            }
            None => debug!("Nothing queued to flush"),
        }
        Ok(())
    }

    fn close(&self) {
        let pending = self.synchronizations.len();
        if pending > 0 {
            warn!(pending, "Worker closed with transactions still open; their work is dropped");
        }
    }
}
