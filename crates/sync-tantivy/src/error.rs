//! Tantivy backend error types.

use sync_engine::BackendError;
use thiserror::Error;

/// Errors that can occur while applying work to a Tantivy unit.
#[derive(Debug, Error)]
pub enum TantivyBackendError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored fields could not be encoded or decoded
    #[error("Stored fields error: {0}")]
    Json(#[from] serde_json::Error),

    /// Index on disk was created with another schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Work arrived before the unit was initialized
    #[error("Unit not initialized: {0}")]
    NotInitialized(String),

    /// Work arrived after the unit was closed
    #[error("Unit closed: {0}")]
    Closed(String),

    /// Deletion query kind this backend cannot express
    #[error("Unsupported deletion query: {0}")]
    UnsupportedQuery(String),

    /// Writer lock was poisoned by a panicking thread
    #[error("Index is locked: {0}")]
    IndexLocked(String),
}

impl From<TantivyBackendError> for BackendError {
    fn from(e: TantivyBackendError) -> Self {
        match e {
            TantivyBackendError::NotInitialized(unit) => BackendError::NotInitialized(unit),
            TantivyBackendError::Closed(unit) => BackendError::Closed(unit),
            TantivyBackendError::UnsupportedQuery(kind) => BackendError::Unsupported(kind),
            TantivyBackendError::IndexLocked(reason) => BackendError::LockPoisoned(reason),
            other => BackendError::Index(other.to_string()),
        }
    }
}
