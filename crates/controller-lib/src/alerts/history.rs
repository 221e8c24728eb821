//! Rolling alert history
//!
//! Handles:
//! - De-duplication of alerts sharing a `(kind, severity)` key within a window
//! - Pruning to a rolling window
//! - The recent-alert count consumed by the health scorer

use crate::models::{Alert, AlertKind, AlertSeverity};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Default rolling window (1 hour)
const DEFAULT_WINDOW_SECS: u64 = 60 * 60;

/// Key for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupKey {
    kind: AlertKind,
    severity: AlertSeverity,
}

impl From<&Alert> for DedupKey {
    fn from(alert: &Alert) -> Self {
        Self {
            kind: alert.kind,
            severity: alert.severity,
        }
    }
}

/// Bounded alert history; timestamps are unix seconds
#[derive(Debug)]
pub struct AlertHistory {
    alerts: VecDeque<Alert>,
    /// key -> last recorded timestamp
    last_recorded: HashMap<DedupKey, i64>,
    window_secs: i64,
    dedup_secs: i64,
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_WINDOW_SECS),
            Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
        )
    }
}

impl AlertHistory {
    pub fn new(window: Duration, dedup_window: Duration) -> Self {
        Self {
            alerts: VecDeque::new(),
            last_recorded: HashMap::new(),
            window_secs: window.as_secs() as i64,
            dedup_secs: dedup_window.as_secs() as i64,
        }
    }

    /// Check if an alert repeats a condition recorded within the dedup window
    pub fn should_suppress(&self, alert: &Alert) -> bool {
        self.last_recorded
            .get(&DedupKey::from(alert))
            .is_some_and(|last| alert.timestamp - last < self.dedup_secs)
    }

    /// Record an alert unless suppressed; returns whether it was recorded
    pub fn record(&mut self, alert: Alert) -> bool {
        if self.should_suppress(&alert) {
            return false;
        }
        self.last_recorded.insert(DedupKey::from(&alert), alert.timestamp);
        self.alerts.push_back(alert);
        true
    }

    /// Drop alerts older than the rolling window and expired dedup entries
    pub fn prune(&mut self, now: i64) -> usize {
        let before = self.alerts.len();
        let cutoff = now - self.window_secs;
        self.alerts.retain(|alert| alert.timestamp >= cutoff);

        let dedup_secs = self.dedup_secs;
        self.last_recorded.retain(|_, last| now - *last < dedup_secs);

        before - self.alerts.len()
    }

    /// Alerts inside the rolling window ending at `now`
    pub fn recent_count(&self, now: i64) -> usize {
        let cutoff = now - self.window_secs;
        self.alerts
            .iter()
            .filter(|alert| alert.timestamp >= cutoff)
            .count()
    }

    /// Most recent alerts, newest first
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
