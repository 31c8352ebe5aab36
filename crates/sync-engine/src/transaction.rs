//! Host transaction interfaces, plus a local transaction for hosts that do
//! not bring their own manager.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::WorkError;

/// Opaque identity of a host transaction. Compared by address.
pub type TransactionId = Arc<dyn Any + Send + Sync>;

/// Final status handed to `after_completion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Committed,
    RolledBack,
    /// The host could not tell; treated like a rollback
    Unknown,
}

/// Hook the host calls around transaction completion.
pub trait TransactionSynchronization: Send + Sync {
    fn before_completion(&self) -> Result<(), WorkError>;

    fn after_completion(&self, status: TransactionStatus) -> Result<(), WorkError>;
}

/// View of the caller's transaction state.
pub trait TransactionContext {
    fn is_transaction_in_progress(&self) -> bool;

    /// Identity of the current transaction, when one is in progress.
    fn transaction_identifier(&self) -> Option<TransactionId>;

    fn register_synchronization(&self, synchronization: Arc<dyn TransactionSynchronization>);
}

/// Context for callers outside any transaction.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransaction;

impl TransactionContext for NoTransaction {
    fn is_transaction_in_progress(&self) -> bool {
        false
    }

    fn transaction_identifier(&self) -> Option<TransactionId> {
        None
    }

    fn register_synchronization(&self, _synchronization: Arc<dyn TransactionSynchronization>) {
        warn!("Synchronization registered without a transaction; it will never run");
    }
}

/// Minimal in-process transaction that drives registered hooks.
pub struct LocalTransaction {
    id: TransactionId,
    label: Ulid,
    hooks: Mutex<Vec<Arc<dyn TransactionSynchronization>>>,
    completed: Mutex<Option<TransactionStatus>>,
}

impl LocalTransaction {
    pub fn begin() -> Arc<Self> {
        let label = Ulid::new();
        debug!(transaction = %label, "Transaction started");
        Arc::new(Self {
            id: Arc::new(label),
            label,
            hooks: Mutex::new(Vec::new()),
            completed: Mutex::new(None),
        })
    }

    pub fn status(&self) -> Option<TransactionStatus> {
        self.completed.lock().ok().and_then(|s| *s)
    }

    /// Run `before_completion` on every hook, then `after_completion`.
    ///
    /// A failing pre-commit hook turns the commit into a rollback and its
    /// error is returned.
    pub fn commit(&self) -> Result<(), WorkError> {
        let hooks = self.take_hooks()?;
        for hook in &hooks {
            if let Err(e) = hook.before_completion() {
                warn!(transaction = %self.label, error = %e, "Pre-commit hook failed, rolling back");
                self.finish(&hooks, TransactionStatus::RolledBack)?;
                return Err(e);
            }
        }
        self.finish(&hooks, TransactionStatus::Committed)
    }

    pub fn rollback(&self) -> Result<(), WorkError> {
        let hooks = self.take_hooks()?;
        self.finish(&hooks, TransactionStatus::RolledBack)
    }

    fn take_hooks(&self) -> Result<Vec<Arc<dyn TransactionSynchronization>>, WorkError> {
        let mut completed = self
            .completed
            .lock()
            .map_err(|e| WorkError::LockPoisoned(e.to_string()))?;
        if completed.is_some() {
            return Err(WorkError::SynchronizationCompleted);
        }
        // Mark as ending so no further hooks are accepted.
        *completed = Some(TransactionStatus::Unknown);
        let hooks = std::mem::take(
            &mut *self
                .hooks
                .lock()
                .map_err(|e| WorkError::LockPoisoned(e.to_string()))?,
        );
        Ok(hooks)
    }

    /// Every hook sees the status; the first error is returned.
    fn finish(
        &self,
        hooks: &[Arc<dyn TransactionSynchronization>],
        status: TransactionStatus,
    ) -> Result<(), WorkError> {
        let mut first_error = None;
        for hook in hooks {
            if let Err(e) = hook.after_completion(status) {
                warn!(transaction = %self.label, error = %e, "Post-completion hook failed");
                first_error.get_or_insert(e);
            }
        }
        if let Ok(mut completed) = self.completed.lock() {
            *completed = Some(status);
        }
        debug!(transaction = %self.label, status = ?status, "Transaction completed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl TransactionContext for LocalTransaction {
    fn is_transaction_in_progress(&self) -> bool {
        self.status().is_none()
    }

    fn transaction_identifier(&self) -> Option<TransactionId> {
        self.is_transaction_in_progress().then(|| self.id.clone())
    }

    fn register_synchronization(&self, synchronization: Arc<dyn TransactionSynchronization>) {
        match self.hooks.lock() {
            Ok(mut hooks) => hooks.push(synchronization),
            Err(e) => warn!(transaction = %self.label, error = %e, "Could not register synchronization"),
        }
    }
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("id", &self.label)
            .field("status", &self.status())
            .finish()
    }
}
