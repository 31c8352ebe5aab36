//! # sync-engine
//!
//! Keeps full-text indexes in step with a transactional primary store.
//!
//! Work submitted while a transaction is open is collected per transaction,
//! merged per entity, and applied to the index units only once the
//! transaction commits. A rollback applies nothing.
//!
//! ## Pipeline
//! - [`Worker`]: entry point, binds work to the caller's transaction
//! - [`WorkQueueSynchronization`]: per-transaction queue and lifecycle
//! - [`WorkPlan`]: merges work per entity and cascades to containers
//! - [`QueueingProcessor`]: batch threshold in front of the dispatcher
//! - [`TransactionalDispatcher`] / [`StreamingDispatcher`]: routing and commit
//! - [`BackendQueueProcessor`]: applies operations to one index unit
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use sync_engine::{EntityBinding, LocalTransaction, NotShardedStrategy, SearchIntegrator};
//! use sync_types::{EntitySnapshot, Settings, WorkItem};
//!
//! let settings = Settings::default().with_backend("blackhole");
//! let integrator = SearchIntegrator::builder(settings)
//!     .bind(EntityBinding::indexed("Book", Arc::new(NotShardedStrategy::new("Book"))))
//!     .build()
//!     .unwrap();
//!
//! let tx = LocalTransaction::begin();
//! let book = EntitySnapshot::new("Book", "1").with_field("title", "Dune");
//! integrator.worker().perform_work(WorkItem::add(book), &*tx).unwrap();
//! tx.commit().unwrap();
//! integrator.close().unwrap();
//! ```

pub mod async_lane;
pub mod backend;
pub mod bulk;
pub mod dispatch;
pub mod error;
pub mod error_handler;
pub mod integrator;
pub mod interceptor;
pub mod metadata;
pub mod monitor;
pub mod plan;
pub mod processor;
pub mod queue;
pub mod recording;
pub mod registry;
pub mod routing;
pub mod splitter;
pub mod synchronization;
pub mod transaction;
pub mod units;
pub mod worker;

#[cfg(test)]
mod testing;

pub use async_lane::{AsyncBackend, AsyncLane};
pub use backend::{
    BackendFactory, BackendQueueProcessor, BackendRegistry, BlackholeBackend, UnitConfig,
};
pub use bulk::{BulkIndexConfig, BulkIndexStats, BulkIndexer};
pub use dispatch::{StreamingDispatcher, TransactionalDispatcher};
pub use error::{BackendError, CommitFailure, UnitFailure, WorkError};
pub use error_handler::{CollectingErrorHandler, ErrorContext, ErrorHandler, LogErrorHandler};
pub use integrator::{SearchIntegrator, SearchIntegratorBuilder};
pub use interceptor::{EntityIndexingInterceptor, IndexingOverride};
pub use metadata::{
    ContainmentGraph, EntityBinding, EntityRegistry, EntityRegistryBuilder, SnapshotContainment,
};
pub use monitor::{CountingMonitor, IndexingMonitor, NoOpMonitor};
pub use plan::{DepthBudget, PendingChange, WorkPlan};
pub use processor::QueueingProcessor;
pub use queue::WorkQueue;
pub use recording::RecordingBackend;
pub use registry::SynchronizationRegistry;
pub use routing::{
    route, shard_for, FieldShardingStrategy, IdHashShardingStrategy, IndexRoute,
    IndexRoutingStrategy, NotShardedStrategy, RoutedOperation,
};
pub use splitter::{CommitReport, PerIndexSplitter, UnitFilter};
pub use synchronization::{DispatchPoint, SynchronizationState, WorkQueueSynchronization};
pub use transaction::{
    LocalTransaction, NoTransaction, TransactionContext, TransactionId, TransactionStatus,
    TransactionSynchronization,
};
pub use units::IndexUnitRegistry;
pub use worker::{TransactionalWorker, Worker};
