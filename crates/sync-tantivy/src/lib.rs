//! # sync-tantivy
//!
//! Tantivy backend for the index synchronization pipeline.
//!
//! Each index unit gets its own Tantivy index, file-backed (`tantivy`) or in
//! memory (`ram`). Documents are keyed by `tenant/type/id`, so replacing and
//! deleting one entity is a single term deletion.
//!
//! ## Features
//! - Commit policies: per change-set, manual (flush/optimize), on close
//! - Purge-all by type, optionally within one tenant
//! - Term deletion queries
//! - Optimize merges every segment of a unit
//! - Forced asynchronous stream work on a per-unit lane
//!
//! ## Usage
//!
//! ```rust
//! use sync_engine::BackendRegistry;
//! use sync_tantivy::register_tantivy_backends;
//!
//! let mut registry = BackendRegistry::with_builtins();
//! register_tantivy_backends(&mut registry);
//! assert!(registry.contains("ram"));
//! ```

pub mod backend;
pub mod document;
pub mod error;
pub mod index;
pub mod schema;
pub mod searcher;

pub use backend::{
    register_tantivy_backends, TantivyBackend, TantivyBackendFactory, RAM_BACKEND,
    TANTIVY_BACKEND,
};
pub use document::{body_text, doc_to_stored, snapshot_to_doc, StoredDocument};
pub use error::TantivyBackendError;
pub use index::{open_or_create_index, ApplyTally, UnitIndex, UnitStorage};
pub use schema::{build_unit_schema, scope_value, term_value, UnitSchema};
pub use searcher::{SearchHit, UnitSearcher};
