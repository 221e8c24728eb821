//! Monitoring orchestration
//!
//! This module provides:
//! - [`MonitorState`]: the rolling alert and health histories owned by the loops
//! - [`ControllerHandle`]: shared handles to every component, used by the
//!   loops, the status API and the message-handling path
//! - [`MonitorLoop`]: the health, alert-maintenance and session-cleanup loops

mod r#loop;
mod signal;


pub use r#loop::{MonitorLoop, MonitorLoopBuilder, TickReport};
pub use signal::MonitorSignal;

use crate::alerts::AlertHistory;
use crate::collector::SnapshotCollector;
use crate::config::ControllerConfig;
use crate::emergency::{CleanupPlan, EmergencyController};
use crate::health::HealthRegistry;
use crate::models::{Alert, HealthScore, Snapshot};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::restart::{ActiveOperations, RestartController};
use crate::scoring::HealthHistory;
use crate::sessions::SessionRegistry;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Rolling histories and the latest readings
///
/// Written only by the monitoring loops; everything else reads copies.
#[derive(Debug)]
pub struct MonitorState {
    alerts: RwLock<AlertHistory>,
    health: RwLock<HealthHistory>,
    latest_snapshot: RwLock<Option<Snapshot>>,
}

impl MonitorState {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            alerts: RwLock::new(AlertHistory::new(
                config.monitor.alert_window(),
                config.monitor.alert_dedup_window(),
            )),
            health: RwLock::new(HealthHistory::new(config.monitor.health_history_len)),
            latest_snapshot: RwLock::new(None),
        }
    }

    pub(crate) async fn set_snapshot(&self, snapshot: Snapshot) {
        *self.latest_snapshot.write().await = Some(snapshot);
    }

    pub async fn latest_snapshot(&self) -> Option<Snapshot> {
        self.latest_snapshot.read().await.clone()
    }

    /// Record alerts, returning the ones that were not de-duplicated
    pub(crate) async fn record_alerts(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        let mut history = self.alerts.write().await;
        alerts
            .into_iter()
            .filter(|alert| history.record(alert.clone()))
            .collect()
    }

    pub(crate) async fn prune_alerts(&self, now: i64) -> usize {
        self.alerts.write().await.prune(now)
    }

    pub async fn recent_alert_count(&self, now: i64) -> usize {
        self.alerts.read().await.recent_count(now)
    }

    /// Newest alerts first
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts.read().await.recent(limit)
    }

    pub(crate) async fn push_score(&self, score: HealthScore) {
        self.health.write().await.push(score);
    }

    pub async fn latest_score(&self) -> Option<HealthScore> {
        self.health.read().await.latest().copied()
    }

    pub async fn health_trend(&self) -> f64 {
        self.health.read().await.trend()
    }

    pub async fn average_score(&self) -> Option<f64> {
        self.health.read().await.average()
    }
}

/// Shared handles to every controller component
#[derive(Clone)]
pub struct ControllerHandle {
    pub config: Arc<ControllerConfig>,
    pub collector: Arc<SnapshotCollector>,
    pub state: Arc<MonitorState>,
    pub sessions: Arc<SessionRegistry>,
    pub operations: Arc<ActiveOperations>,
    pub cleanup_plan: Arc<CleanupPlan>,
    pub emergency: Arc<EmergencyController>,
    pub restart: Arc<RestartController>,
    pub signal: MonitorSignal,
    pub health: HealthRegistry,
    pub metrics: ControllerMetrics,
    pub logger: StructuredLogger,
}
