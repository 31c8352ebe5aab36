//! Shared fixtures for unit tests.

use std::sync::Arc;

use sync_types::IndexUnitId;

use crate::dispatch::{StreamingDispatcher, TransactionalDispatcher};
use crate::error_handler::CollectingErrorHandler;
use crate::metadata::{EntityBinding, EntityRegistry};
use crate::processor::QueueingProcessor;
use crate::recording::RecordingBackend;
use crate::registry::SynchronizationRegistry;
use crate::routing::NotShardedStrategy;
use crate::synchronization::{DispatchPoint, WorkQueueSynchronization};
use crate::units::IndexUnitRegistry;

/// A `Book` type on one recording unit, wired through to a processor.
pub(crate) struct Pipeline {
    pub entities: Arc<EntityRegistry>,
    pub backend: Arc<RecordingBackend>,
    pub handler: Arc<CollectingErrorHandler>,
    pub processor: Arc<QueueingProcessor>,
    pub registry: Arc<SynchronizationRegistry>,
}

impl Pipeline {
    pub fn new(batch_size: usize) -> Self {
        let entities = Arc::new(
            EntityRegistry::builder()
                .bind(EntityBinding::indexed(
                    "Book",
                    Arc::new(NotShardedStrategy::new("Book")),
                ))
                .bind(EntityBinding::contained_only("Review").with_contained_in("book", Some(1)))
                .build(),
        );
        let backend = Arc::new(RecordingBackend::new());
        let mut units = IndexUnitRegistry::new();
        units.insert(IndexUnitId::new("Book"), backend.clone());
        let units = Arc::new(units);
        let handler = Arc::new(CollectingErrorHandler::new());
        let streaming = Arc::new(StreamingDispatcher::new(
            entities.clone(),
            units.clone(),
            None,
            handler.clone(),
        ));
        let dispatcher = Arc::new(TransactionalDispatcher::new(
            entities.clone(),
            units,
            None,
            handler.clone(),
            streaming,
        ));
        Self {
            entities,
            backend,
            handler,
            processor: Arc::new(QueueingProcessor::new(batch_size, dispatcher, None)),
            registry: Arc::new(SynchronizationRegistry::new()),
        }
    }

    /// A synchronization that is not in the registry.
    pub fn synchronization(&self, point: DispatchPoint) -> Arc<WorkQueueSynchronization> {
        Arc::new(self.synchronization_with_key(point, 0))
    }

    pub fn synchronization_with_key(&self, point: DispatchPoint, key: usize) -> WorkQueueSynchronization {
        WorkQueueSynchronization::new(
            self.entities.clone(),
            self.processor.clone(),
            point,
            Arc::downgrade(&self.registry),
            key,
        )
    }
}
