//! # sync-types
//!
//! Shared domain types for keeping full-text indexes in step with a
//! transactional primary store.
//!
//! This crate defines the data that flows through the indexing pipeline:
//! - Entities: keys and snapshots of the domain objects being indexed
//! - Work items: requested changes to one entity's indexed representation
//! - Index operations: the optimized, routable form of a work item
//! - Settings: layered configuration for the pipeline
//!
//! ## Usage
//!
//! ```rust
//! use sync_types::{EntitySnapshot, WorkItem, WorkKind};
//!
//! let book = EntitySnapshot::new("Book", "1").with_field("title", "Dune");
//! let item = WorkItem::add(book);
//! assert_eq!(item.kind(), WorkKind::Add);
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod operation;
pub mod work;

pub use config::{CommitPolicy, ExecutionMode, Settings, DEFAULT_WORKER_SCOPE};
pub use entity::{ContainerLink, DocumentId, EntityKey, EntitySnapshot, EntityType, TenantId};
pub use error::ConfigError;
pub use operation::{DeletionQuery, DeletionQueryKind, IndexOperation, IndexUnitId, OperationKind};
pub use work::{WorkItem, WorkKind};
