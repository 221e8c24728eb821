//! Snapshot threshold evaluation

use crate::config::{AlertThresholds, SeverityThresholds};
use crate::emergency::CleanupReport;
use crate::models::{Alert, AlertKind, AlertSeverity, Snapshot};

/// Compares snapshots against the configured threshold table
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Emit at most one alert per metric, at the highest tier exceeded
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<Alert> {
        [
            (AlertKind::Memory, snapshot.memory_mb, &self.thresholds.memory, "MB"),
            (AlertKind::Cpu, snapshot.cpu_percent, &self.thresholds.cpu, "%"),
            (
                AlertKind::Disk,
                snapshot.disk_usage_percent,
                &self.thresholds.disk,
                "%",
            ),
        ]
        .into_iter()
        .filter_map(|(kind, value, thresholds, unit)| {
            let (severity, threshold) = highest_exceeded(value, thresholds)?;
            Some(Alert {
                severity,
                kind,
                message: format!(
                    "{kind} usage {value:.1}{unit} exceeds {severity} threshold {threshold:.1}{unit}"
                ),
                value,
                threshold,
                timestamp: snapshot.timestamp,
            })
        })
        .collect()
    }

    /// Warning for a tick that ran on the last-known snapshot
    ///
    /// `value` is the snapshot's age in seconds.
    pub fn stale_snapshot(&self, snapshot: &Snapshot, now: i64) -> Option<Alert> {
        if !snapshot.stale {
            return None;
        }

        let age = (now - snapshot.timestamp).max(0);
        Some(Alert {
            severity: AlertSeverity::Warning,
            kind: AlertKind::Collection,
            message: format!("resource snapshot is stale, reusing a reading {age}s old"),
            value: age as f64,
            threshold: 0.0,
            timestamp: now,
        })
    }

    /// Error for a cleanup cycle with failed steps
    pub fn cleanup_failure(&self, report: &CleanupReport, now: i64) -> Option<Alert> {
        if report.steps_failed == 0 {
            return None;
        }

        let mut message = format!(
            "{} of {} {} cleanup steps failed",
            report.steps_failed,
            report.steps_run,
            report.tier.as_str()
        );
        if let Some(failure) = &report.first_failure {
            message.push_str(": ");
            message.push_str(failure);
        }

        Some(Alert {
            severity: AlertSeverity::Error,
            kind: AlertKind::Cleanup,
            message,
            value: report.steps_failed as f64,
            threshold: 0.0,
            timestamp: now,
        })
    }
}

/// Highest tier whose threshold is strictly exceeded
fn highest_exceeded(value: f64, thresholds: &SeverityThresholds) -> Option<(AlertSeverity, f64)> {
    [
        (AlertSeverity::Critical, thresholds.critical),
        (AlertSeverity::Error, thresholds.error),
        (AlertSeverity::Warning, thresholds.warning),
        (AlertSeverity::Info, thresholds.info),
    ]
    .into_iter()
    .find(|(_, threshold)| value > *threshold)
}
