//! Work queue: one work plan plus its sealed output.

use std::mem;
use std::sync::Arc;

use sync_types::{IndexOperation, WorkItem};

use crate::metadata::EntityRegistry;
use crate::plan::WorkPlan;

/// Owns a [`WorkPlan`] and, once sealed, its compiled operation list.
///
/// Mutation is expected from one thread at a time (the owning
/// transaction's); the queue does no locking of its own.
pub struct WorkQueue {
    plan: WorkPlan,
    sealed: Option<Vec<IndexOperation>>,
}

impl WorkQueue {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self {
            plan: WorkPlan::new(registry),
            sealed: None,
        }
    }

    /// Add work; any earlier seal is invalidated.
    pub fn add(&mut self, item: WorkItem) {
        self.sealed = None;
        self.plan.add_work(item);
    }

    /// Detach the current plan into a standalone queue, leaving this one
    /// with a fresh empty plan.
    pub fn split_queue(&mut self) -> WorkQueue {
        let fresh = WorkPlan::new(self.plan.registry().clone());
        WorkQueue {
            plan: mem::replace(&mut self.plan, fresh),
            sealed: self.sealed.take(),
        }
    }

    /// Compile the plan and keep the result.
    pub fn seal_work_plan(&mut self) {
        self.sealed = Some(self.plan.compile());
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.is_some()
    }

    /// The sealed operation list.
    ///
    /// # Panics
    ///
    /// Panics if the queue was not sealed since the last `add`.
    pub fn sealed_queue(&self) -> &[IndexOperation] {
        match &self.sealed {
            Some(operations) => operations,
            None => panic!("work queue read before it was sealed"),
        }
    }

    pub fn pending_size(&self) -> usize {
        self.plan.size()
    }

    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }

    pub fn clear(&mut self) {
        self.plan.clear();
        self.sealed = None;
    }
}
