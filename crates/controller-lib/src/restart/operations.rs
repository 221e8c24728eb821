//! In-flight operation tracking
//!
//! Work that must not be cut short by a restart holds an [`OperationGuard`]
//! for its duration. Dropping the guard removes the entry and wakes the
//! restart drain.

use crate::error::{ControllerError, Result};
use crate::observability::ControllerMetrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Description of one in-flight operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveOperation {
    pub id: u64,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Shared {
    operations: DashMap<u64, ActiveOperation>,
    /// Signalled whenever an operation finishes
    finished: Notify,
}

/// Set of operations a restart waits for
#[derive(Debug)]
pub struct ActiveOperations {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    accepting: AtomicBool,
    metrics: ControllerMetrics,
}

impl ActiveOperations {
    pub fn new(metrics: ControllerMetrics) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            next_id: AtomicU64::new(1),
            accepting: AtomicBool::new(true),
            metrics,
        }
    }

    /// Mark an operation active until the returned guard is dropped
    pub fn begin(&self, label: impl Into<String>) -> Result<OperationGuard> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ControllerError::RestartInProgress);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let operation = ActiveOperation {
            id,
            label: label.into(),
            started_at: Utc::now(),
        };
        debug!(operation_id = id, label = %operation.label, "Operation started");

        self.shared.operations.insert(id, operation);
        self.metrics.set_active_operations(self.shared.operations.len());

        Ok(OperationGuard {
            id,
            shared: self.shared.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Refuse new operations from now on
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.shared.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.operations.is_empty()
    }

    /// Snapshot of in-flight operations, oldest first
    pub fn list(&self) -> Vec<ActiveOperation> {
        let mut operations: Vec<ActiveOperation> = self
            .shared
            .operations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        operations.sort_by_key(|op| op.id);
        operations
    }

    /// Wait until some operation finishes
    pub async fn finished(&self) {
        self.shared.finished.notified().await;
    }
}

/// RAII marker for one in-flight operation
#[derive(Debug)]
pub struct OperationGuard {
    id: u64,
    shared: Arc<Shared>,
    metrics: ControllerMetrics,
}

impl OperationGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.shared.operations.remove(&self.id);
        self.metrics.set_active_operations(self.shared.operations.len());
        // notify_one keeps a permit if the drain is not currently waiting
        self.shared.finished.notify_one();
    }
}
