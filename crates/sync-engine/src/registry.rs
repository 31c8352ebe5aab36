//! Registry of live synchronizations, keyed by transaction identity.
//!
//! Entries hold the transaction identifier weakly. When a host drops a
//! transaction without ever completing it, the entry is reaped on the next
//! access instead of pinning its queue forever.

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::synchronization::WorkQueueSynchronization;
use crate::transaction::TransactionId;

struct Registration {
    transaction: Weak<dyn Any + Send + Sync>,
    synchronization: Arc<WorkQueueSynchronization>,
}

impl Registration {
    fn belongs_to(&self, id: &TransactionId) -> bool {
        self.transaction
            .upgrade()
            .is_some_and(|live| Arc::ptr_eq(&live, id))
    }
}

/// Address of the identifier, used as the map key.
pub fn registry_key(id: &TransactionId) -> usize {
    Arc::as_ptr(id) as *const () as usize
}

/// At most one live synchronization per transaction.
#[derive(Default)]
pub struct SynchronizationRegistry {
    entries: DashMap<usize, Registration>,
}

impl SynchronizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing synchronization for the transaction, or a new one made by
    /// `create`. The flag is true when `create` was used.
    ///
    /// Dead entries are reaped only when a new entry is created, so lookups
    /// for a live transaction touch one shard.
    pub fn get_or_create(
        &self,
        id: &TransactionId,
        create: impl FnOnce(usize) -> Arc<WorkQueueSynchronization>,
    ) -> (Arc<WorkQueueSynchronization>, bool) {
        let created = self.lookup_or_insert(id, create);
        if created.1 {
            // The entry guard is released; retain locks every shard.
            self.reap();
        }
        created
    }

    fn lookup_or_insert(
        &self,
        id: &TransactionId,
        create: impl FnOnce(usize) -> Arc<WorkQueueSynchronization>,
    ) -> (Arc<WorkQueueSynchronization>, bool) {
        let key = registry_key(id);
        let registration = |synchronization: Arc<WorkQueueSynchronization>| Registration {
            transaction: Arc::downgrade(id),
            synchronization,
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().belongs_to(id) {
                    return (occupied.get().synchronization.clone(), false);
                }
                // Address reused by a new transaction after the old one died.
                debug!(key, "Replacing stale synchronization");
                let synchronization = create(key);
                occupied.insert(registration(synchronization.clone()));
                (synchronization, true)
            }
            Entry::Vacant(vacant) => {
                let synchronization = create(key);
                vacant.insert(registration(synchronization.clone()));
                (synchronization, true)
            }
        }
    }

    /// Live synchronization for the transaction, if any.
    pub fn get(&self, id: &TransactionId) -> Option<Arc<WorkQueueSynchronization>> {
        self.entries
            .get(&registry_key(id))
            .filter(|r| r.belongs_to(id))
            .map(|r| r.synchronization.clone())
    }

    /// Remove the entry at `key` if it still holds this synchronization.
    pub fn remove(&self, key: usize, synchronization: &WorkQueueSynchronization) -> bool {
        self.entries
            .remove_if(&key, |_, r| {
                std::ptr::eq(Arc::as_ptr(&r.synchronization), synchronization)
            })
            .is_some()
    }

    /// Drop entries whose transaction no longer exists.
    pub fn reap(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, r| r.transaction.strong_count() > 0);
        let reaped = before.saturating_sub(self.entries.len());
        if reaped > 0 {
            debug!(reaped, "Reaped synchronizations of abandoned transactions");
        }
        reaped
    }

    /// Live entries, after reaping.
    pub fn len(&self) -> usize {
        self.reap();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronization::DispatchPoint;
    use crate::testing::Pipeline;

    fn transaction() -> TransactionId {
        Arc::new(0u8)
    }

    #[test]
    fn test_same_transaction_shares_synchronization() {
        let pipeline = Pipeline::new(10);
        let id = transaction();
        let make = |key| Arc::new(pipeline.synchronization_with_key(DispatchPoint::BeforeCompletion, key));

        let (first, created) = pipeline.registry.get_or_create(&id, make);
        assert!(created);
        let (second, created) = pipeline.registry.get_or_create(&id, make);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(pipeline.registry.get(&id).is_some());
        assert!(pipeline.registry.get(&transaction()).is_none());
    }

    #[test]
    fn test_dropped_transaction_is_reaped() {
        let pipeline = Pipeline::new(10);
        let id = transaction();
        pipeline.registry.get_or_create(&id, |key| {
            Arc::new(pipeline.synchronization_with_key(DispatchPoint::BeforeCompletion, key))
        });
        assert_eq!(pipeline.registry.len(), 1);

        drop(id);
        assert_eq!(pipeline.registry.reap(), 1);
        assert!(pipeline.registry.is_empty());
    }

    #[test]
    fn test_creation_reaps_abandoned_entries() {
        let pipeline = Pipeline::new(10);
        let make = |key| Arc::new(pipeline.synchronization_with_key(DispatchPoint::BeforeCompletion, key));
        let abandoned = transaction();
        pipeline.registry.get_or_create(&abandoned, make);
        drop(abandoned);

        let live = transaction();
        let (_, created) = pipeline.registry.get_or_create(&live, make);
        assert!(created);
        assert_eq!(pipeline.registry.entries.len(), 1);

        let (_, created) = pipeline.registry.get_or_create(&live, make);
        assert!(!created);
        assert_eq!(pipeline.registry.entries.len(), 1);
    }

    #[test]
    fn test_remove_only_matching_synchronization() {
        let pipeline = Pipeline::new(10);
        let id = transaction();
        let (synchronization, _) = pipeline.registry.get_or_create(&id, |key| {
            Arc::new(pipeline.synchronization_with_key(DispatchPoint::BeforeCompletion, key))
        });
        let key = registry_key(&id);

        let other = pipeline.synchronization(DispatchPoint::BeforeCompletion);
        assert!(!pipeline.registry.remove(key, &other));
        assert!(pipeline.registry.remove(key, &synchronization));
        assert!(pipeline.registry.get(&id).is_none());
    }
}
