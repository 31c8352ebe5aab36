//! Bulk loading of many entities outside any transaction.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use sync_types::{EntitySnapshot, EntityType, IndexOperation, WorkItem};

use crate::dispatch::{StreamingDispatcher, TransactionalDispatcher};
use crate::error::WorkError;
use crate::metadata::EntityRegistry;
use crate::monitor::IndexingMonitor;
use crate::processor::QueueingProcessor;
use crate::queue::WorkQueue;
use crate::splitter::CommitReport;

/// Options for one bulk run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkIndexConfig {
    /// Entities per dispatched batch
    pub batch_size: usize,
    /// Remove every document of the type before loading
    pub purge_first: bool,
    /// Merge segments once loading is done
    pub optimize_after: bool,
}

impl Default for BulkIndexConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            purge_first: true,
            optimize_after: false,
        }
    }
}

/// What a bulk run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkIndexStats {
    pub entities: u64,
    pub batches: u64,
    pub operations: usize,
    pub elapsed_ms: u64,
}

pub struct BulkIndexer {
    entities: Arc<EntityRegistry>,
    processor: QueueingProcessor,
    streaming: Arc<StreamingDispatcher>,
    monitor: Option<Arc<dyn IndexingMonitor>>,
    config: BulkIndexConfig,
}

impl BulkIndexer {
    pub fn new(
        entities: Arc<EntityRegistry>,
        dispatcher: Arc<TransactionalDispatcher>,
        streaming: Arc<StreamingDispatcher>,
        monitor: Option<Arc<dyn IndexingMonitor>>,
        config: BulkIndexConfig,
    ) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            entities,
            processor: QueueingProcessor::new(batch_size, dispatcher, monitor.clone()),
            streaming,
            monitor,
            config,
        }
    }

    pub fn config(&self) -> &BulkIndexConfig {
        &self.config
    }

    /// Load every snapshot of `entity_type`.
    ///
    /// Snapshots of other types are skipped. The first failing batch stops
    /// the run; batches dispatched before it stay applied.
    pub fn run(
        &self,
        entity_type: &EntityType,
        snapshots: impl IntoIterator<Item = EntitySnapshot>,
    ) -> Result<BulkIndexStats, WorkError> {
        if !self.entities.is_indexed(entity_type) {
            return Err(WorkError::NotIndexable(entity_type.clone()));
        }
        let started = Instant::now();
        let mut stats = BulkIndexStats::default();
        info!(entity_type = %entity_type, purge_first = self.config.purge_first, "Bulk indexing started");

        if self.config.purge_first {
            self.stream(IndexOperation::PurgeAll {
                entity_type: entity_type.clone(),
                tenant: None,
            })?;
        }

        let mut queue = WorkQueue::new(self.entities.clone());
        for snapshot in snapshots {
            if &snapshot.entity_type != entity_type {
                debug!(entity_type = %snapshot.entity_type, "Skipping snapshot of another type");
                continue;
            }
            // After a purge nothing is left to replace.
            let item = if self.config.purge_first {
                WorkItem::add(snapshot)
            } else {
                WorkItem::index(snapshot)
            };
            stats.entities += 1;
            if let Some(report) = self.processor.add(item, &mut queue)? {
                record_batch(&mut stats, &report);
            }
        }

        if !queue.is_empty() {
            self.processor.prepare_works(&mut queue);
            let report = self.processor.perform_works(&queue)?;
            record_batch(&mut stats, &report);
        }

        self.stream(IndexOperation::Flush {
            entity_type: Some(entity_type.clone()),
        })?;
        if self.config.optimize_after {
            self.stream(IndexOperation::Optimize {
                entity_type: Some(entity_type.clone()),
            })?;
        }

        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            entity_type = %entity_type,
            entities = stats.entities,
            batches = stats.batches,
            elapsed_ms = stats.elapsed_ms,
            "Bulk indexing finished"
        );
        Ok(stats)
    }

    fn stream(&self, operation: IndexOperation) -> Result<CommitReport, WorkError> {
        self.streaming.dispatch(&operation, self.monitor.as_ref(), false)
    }
}

fn record_batch(stats: &mut BulkIndexStats, report: &CommitReport) {
    stats.batches += 1;
    stats.operations += report.operations;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::LogErrorHandler;
    use crate::metadata::EntityBinding;
    use crate::recording::RecordingBackend;
    use crate::routing::NotShardedStrategy;
    use crate::units::IndexUnitRegistry;
    use sync_types::{IndexUnitId, OperationKind};

    fn indexer(config: BulkIndexConfig) -> (BulkIndexer, Arc<RecordingBackend>) {
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
        let streaming = Arc::new(StreamingDispatcher::new(
            entities.clone(),
            units.clone(),
            None,
            Arc::new(LogErrorHandler),
        ));
        let dispatcher = Arc::new(TransactionalDispatcher::new(
            entities.clone(),
            units,
            None,
            Arc::new(LogErrorHandler),
            streaming.clone(),
        ));
        (
            BulkIndexer::new(entities, dispatcher, streaming, None, config),
            backend,
        )
    }

    fn books(n: usize) -> Vec<EntitySnapshot> {
        (0..n)
            .map(|i| EntitySnapshot::new("Book", i.to_string().as_str()).with_field("title", "t"))
            .collect()
    }

    #[test]
    fn test_purge_batches_then_flush() {
        let (indexer, backend) = indexer(BulkIndexConfig {
            batch_size: 4,
            purge_first: true,
            optimize_after: true,
        });
        let stats = indexer.run(&EntityType::new("Book"), books(10)).unwrap();

        assert_eq!(stats.entities, 10);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.operations, 10);
        assert_eq!(
            backend.batches().iter().map(Vec::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert!(backend
            .batches()
            .iter()
            .flatten()
            .all(|op| op.kind() == OperationKind::Add));

        let streamed: Vec<OperationKind> = backend.streamed().iter().map(|(op, _)| op.kind()).collect();
        assert_eq!(
            streamed,
            vec![OperationKind::PurgeAll, OperationKind::Flush, OperationKind::Optimize]
        );
    }

    #[test]
    fn test_without_purge_entities_are_replaced() {
        let (indexer, backend) = indexer(BulkIndexConfig {
            batch_size: 100,
            purge_first: false,
            optimize_after: false,
        });
        indexer.run(&EntityType::new("Book"), books(3)).unwrap();

        assert!(backend
            .batches()
            .iter()
            .flatten()
            .all(|op| op.kind() == OperationKind::Update));
        let streamed: Vec<OperationKind> = backend.streamed().iter().map(|(op, _)| op.kind()).collect();
        assert_eq!(streamed, vec![OperationKind::Flush]);
    }

    #[test]
    fn test_rejects_contained_only_type() {
        let (indexer, backend) = indexer(BulkIndexConfig::default());
        let err = indexer
            .run(&EntityType::new("Review"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, WorkError::NotIndexable(_)));
        assert!(backend.streamed().is_empty());
    }

    #[test]
    fn test_failing_batch_stops_the_run() {
        let (indexer, backend) = indexer(BulkIndexConfig {
            batch_size: 2,
            purge_first: false,
            optimize_after: false,
        });
        backend.set_failing(true);
        let err = indexer.run(&EntityType::new("Book"), books(5)).unwrap_err();
        assert!(matches!(err, WorkError::Commit(_)));
    }
}
