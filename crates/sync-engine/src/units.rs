//! The set of configured index units and their processors.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use sync_types::IndexUnitId;

use crate::backend::BackendQueueProcessor;
use crate::error::{CommitFailure, UnitFailure};

/// Processors by unit, in registration order.
#[derive(Default)]
pub struct IndexUnitRegistry {
    processors: HashMap<IndexUnitId, Arc<dyn BackendQueueProcessor>>,
    order: Vec<IndexUnitId>,
}

impl IndexUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit's processor, replacing an earlier one.
    pub fn insert(&mut self, unit: IndexUnitId, processor: Arc<dyn BackendQueueProcessor>) {
        if self.processors.insert(unit.clone(), processor).is_none() {
            self.order.push(unit);
        }
    }

    pub fn get(&self, unit: &IndexUnitId) -> Option<&Arc<dyn BackendQueueProcessor>> {
        self.processors.get(unit)
    }

    pub fn contains(&self, unit: &IndexUnitId) -> bool {
        self.processors.contains_key(unit)
    }

    pub fn ids(&self) -> &[IndexUnitId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Close every unit, attempting all of them even when some fail.
    pub fn close_all(&self) -> Result<(), CommitFailure> {
        let mut failure = CommitFailure::new();
        for unit in &self.order {
            if let Some(processor) = self.processors.get(unit) {
                if let Err(error) = processor.close() {
                    warn!(unit = %unit, error = %error, "Failed to close index unit");
                    failure.record(UnitFailure {
                        unit: unit.clone(),
                        operations: Vec::new(),
                        error,
                    });
                }
            }
        }
        info!(units = self.order.len(), failed = failure.failures.len(), "Closed index units");
        failure.into_result()
    }
}
