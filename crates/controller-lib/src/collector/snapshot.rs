//! Snapshot collection with last-known fallback

use super::ResourceProbe;
use crate::error::{ControllerError, Result};
use crate::models::Snapshot;
use crate::observability::ControllerMetrics;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Collects snapshots and keeps the last good one
///
/// A failed read never propagates to the monitoring loop: the last-known
/// snapshot is returned with `stale` set, or an empty stale snapshot if no
/// read has succeeded yet.
pub struct SnapshotCollector {
    probe: Arc<dyn ResourceProbe>,
    last: RwLock<Option<Snapshot>>,
    metrics: ControllerMetrics,
}

impl SnapshotCollector {
    pub fn new(probe: Arc<dyn ResourceProbe>, metrics: ControllerMetrics) -> Self {
        Self {
            probe,
            last: RwLock::new(None),
            metrics,
        }
    }

    /// Read a fresh snapshot, surfacing probe errors
    pub async fn try_collect(&self) -> Result<Snapshot> {
        let snapshot = self
            .probe
            .sample()
            .await
            .map_err(|e| ControllerError::CollectionFailure(format!("{e:#}")))?;

        *self.last.write().await = Some(snapshot.clone());
        self.metrics.observe_snapshot(&snapshot);
        Ok(snapshot)
    }

    /// Read a snapshot, falling back to the last-known one on failure
    pub async fn collect(&self) -> Snapshot {
        match self.try_collect().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Snapshot collection failed, reusing last-known snapshot");
                self.metrics.inc_collection_failures();

                self.last
                    .read()
                    .await
                    .clone()
                    .unwrap_or_else(Snapshot::empty)
                    .into_stale()
            }
        }
    }

    /// Last successfully collected snapshot
    pub async fn latest(&self) -> Option<Snapshot> {
        self.last.read().await.clone()
    }
}
