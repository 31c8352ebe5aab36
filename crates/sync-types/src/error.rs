//! Error types shared across the index synchronization crates.

use thiserror::Error;

/// Setup-time configuration errors.
///
/// These are reported eagerly while the pipeline is being assembled and
/// are fatal to startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration sources could not be read or deserialized
    #[error("Configuration error: {0}")]
    Load(String),

    /// A setting holds a value outside its accepted range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// No backend factory is registered under this name
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Worker scope names a custom worker that was never supplied
    #[error("Unknown worker scope: {0}")]
    UnknownWorkerScope(String),

    /// The named deletion query kind is not recognized at all
    #[error("Unknown deletion query type: {0}")]
    UnknownDeletionQuery(String),

    /// The selected backend cannot apply this kind of deletion query
    #[error("Deletion query type '{kind}' is not supported by backend '{backend}'")]
    UnsupportedDeletionQuery { kind: String, backend: String },

    /// Enlisting in transactions was requested against a backend that cannot take part
    #[error("Backend '{0}' does not support enlisting in transactions")]
    EnlistmentNotSupported(String),

    /// A backend failed to initialize for one of its index units
    #[error("Index unit '{unit}' failed to initialize: {reason}")]
    UnitInitialization { unit: String, reason: String },

    /// An indexed entity type has no index units at all
    #[error("Entity type '{0}' is indexed but has no index units")]
    NoIndexUnits(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfigError::UnknownBackend("jms".to_string());
        assert_eq!(err.to_string(), "Unknown backend: jms");

        let err = ConfigError::UnsupportedDeletionQuery {
            kind: "range".to_string(),
            backend: "tantivy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Deletion query type 'range' is not supported by backend 'tantivy'"
        );

        let err = ConfigError::EnlistmentNotSupported("ram".to_string());
        assert!(err.to_string().contains("enlisting in transactions"));
    }
}
