//! Restart evaluation and graceful restart
//!
//! This module provides:
//! - Multi-factor restart recommendations (memory, uptime, health, sessions, trend)
//! - Graceful execution: stop intake, drain active operations within a grace
//!   period, run emergency cleanup, persist a marker and stop the loops
//! - Tracking of in-flight operations via RAII guards

mod marker;
mod operations;

pub use marker::RestartMarker;
pub use operations::{ActiveOperation, ActiveOperations, OperationGuard};

use crate::config::{ControllerConfig, RestartPolicy};
use crate::emergency::{CleanupPlan, CleanupReport, CleanupTier, RestartRequest};
use crate::error::{ControllerError, Result};
use crate::models::RestartSeverity;
use crate::monitor::MonitorSignal;
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::sessions::SessionRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Exit code the binary uses after an executed restart
pub const RESTART_EXIT_CODE: i32 = 75;

/// Values a restart evaluation looks at
#[derive(Debug, Clone, Default)]
pub struct RestartInputs {
    pub memory_mb: f64,
    pub uptime_hours: f64,
    /// Latest health score, if one has been computed
    pub health_score: Option<f64>,
    /// Last minus first health score over the history window
    pub health_trend: f64,
    pub session_count: usize,
    pub emergency_request: Option<RestartRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRecommendation {
    pub should_restart: bool,
    pub reasons: Vec<String>,
    pub severity: RestartSeverity,
    pub recommended_delay_minutes: Option<u64>,
    pub evaluated_at: DateTime<Utc>,
}

/// One executed restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRecord {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    /// Proceeded while operations were still active
    pub forced: bool,
    pub drain_wait_ms: u64,
    pub remaining_operations: usize,
    pub marker_path: PathBuf,
}

/// Everything a restart did, handed to the process owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartReport {
    pub record: RestartRecord,
    pub cleanup: CleanupReport,
    pub marker: RestartMarker,
    /// Drain timeout error text when the restart was forced
    pub drain_timeout: Option<String>,
}

/// Restart state served on the status API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartStatus {
    pub restart_in_progress: bool,
    pub recommendation: Option<RestartRecommendation>,
    pub history: Vec<RestartRecord>,
    pub active_operation_count: usize,
    pub active_operations: Vec<ActiveOperation>,
}

/// Restart decision maker and executor
pub struct RestartController {
    policy: RestartPolicy,
    high_mb: f64,
    emergency_mb: f64,
    operations: Arc<ActiveOperations>,
    plan: Arc<CleanupPlan>,
    sessions: Arc<SessionRegistry>,
    signal: MonitorSignal,
    in_progress: AtomicBool,
    history: Mutex<VecDeque<RestartRecord>>,
    last_recommendation: Mutex<Option<RestartRecommendation>>,
    report_tx: mpsc::Sender<RestartReport>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl RestartController {
    /// Create the controller and the receiver that yields executed restarts
    pub fn new(
        config: &ControllerConfig,
        operations: Arc<ActiveOperations>,
        plan: Arc<CleanupPlan>,
        sessions: Arc<SessionRegistry>,
        signal: MonitorSignal,
        metrics: ControllerMetrics,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<RestartReport>) {
        let (report_tx, report_rx) = mpsc::channel(1);

        let controller = Self {
            policy: config.restart.clone(),
            high_mb: config.emergency.high_mb,
            emergency_mb: config.emergency.emergency_mb,
            operations,
            plan,
            sessions,
            signal,
            in_progress: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
            last_recommendation: Mutex::new(None),
            report_tx,
            metrics,
            logger,
        };

        (controller, report_rx)
    }

    pub fn operations(&self) -> &Arc<ActiveOperations> {
        &self.operations
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Combine every trigger into one recommendation
    pub fn evaluate(&self, inputs: &RestartInputs) -> RestartRecommendation {
        let policy = &self.policy;
        let mut triggers: Vec<(RestartSeverity, String)> = Vec::new();

        if inputs.memory_mb >= self.emergency_mb {
            triggers.push((
                RestartSeverity::Critical,
                format!(
                    "memory {:.1}MB at or above emergency threshold {:.1}MB",
                    inputs.memory_mb, self.emergency_mb
                ),
            ));
        } else if inputs.memory_mb >= self.high_mb {
            triggers.push((
                RestartSeverity::High,
                format!(
                    "memory {:.1}MB at or above high threshold {:.1}MB",
                    inputs.memory_mb, self.high_mb
                ),
            ));
        }

        if inputs.uptime_hours >= policy.uptime_hard_limit_hours {
            triggers.push((
                RestartSeverity::High,
                format!(
                    "uptime {:.1}h exceeds hard limit {:.1}h",
                    inputs.uptime_hours, policy.uptime_hard_limit_hours
                ),
            ));
        } else if inputs.uptime_hours >= policy.uptime_soft_limit_hours {
            triggers.push((
                RestartSeverity::Low,
                format!(
                    "uptime {:.1}h exceeds soft limit {:.1}h",
                    inputs.uptime_hours, policy.uptime_soft_limit_hours
                ),
            ));
        }

        if let Some(score) = inputs.health_score {
            if score < policy.critical_health_score {
                triggers.push((
                    RestartSeverity::High,
                    format!(
                        "health score {score:.1} below critical {:.1}",
                        policy.critical_health_score
                    ),
                ));
            } else if score < policy.low_health_score {
                triggers.push((
                    RestartSeverity::Medium,
                    format!("health score {score:.1} below {:.1}", policy.low_health_score),
                ));
            }
        }

        if inputs.session_count >= policy.session_threshold {
            triggers.push((
                RestartSeverity::Medium,
                format!(
                    "{} sessions at or above threshold {}",
                    inputs.session_count, policy.session_threshold
                ),
            ));
        }

        if inputs.health_trend < -policy.health_drop_threshold {
            triggers.push((
                RestartSeverity::Low,
                format!("health fell {:.1} points over the window", -inputs.health_trend),
            ));
        }

        if let Some(request) = &inputs.emergency_request {
            triggers.push((request.severity, request.reason.clone()));
        }

        let severity = triggers
            .iter()
            .map(|(severity, _)| *severity)
            .max()
            .unwrap_or_default();

        let recommendation = RestartRecommendation {
            should_restart: severity != RestartSeverity::None,
            reasons: triggers.into_iter().map(|(_, reason)| reason).collect(),
            severity,
            recommended_delay_minutes: severity.recommended_delay_minutes(),
            evaluated_at: Utc::now(),
        };

        *self
            .last_recommendation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(recommendation.clone());
        recommendation
    }

    /// Restart gracefully
    ///
    /// Returns once the marker is written and the loops have been told to
    /// stop; the caller is expected to exit with [`RESTART_EXIT_CODE`].
    pub async fn execute(&self, reason: &str, memory_mb: f64) -> Result<RestartReport> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::RestartInProgress);
        }

        self.logger.log_restart_initiated(reason, self.operations.len());

        // (a) no new monitoring work, no new operations
        self.signal.deactivate();
        self.operations.stop_accepting();

        // (b) drain
        let (waited, drain_timeout) = self.drain().await;
        let remaining = self.operations.len();
        let forced = drain_timeout.is_some();

        // (c) cleanup
        let cleanup = self.plan.run(CleanupTier::Emergency).await;

        // (d) marker
        let marker = RestartMarker::new(reason, memory_mb, self.sessions.len().await);
        if let Err(e) = marker.write_atomic(&self.policy.marker_path) {
            // The restart still proceeds; the next process just starts without a marker
            warn!(
                path = %self.policy.marker_path.display(),
                error = %e,
                "Failed to write restart marker"
            );
        }

        // (e) loops
        self.signal.shutdown();

        let record = RestartRecord {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            forced,
            drain_wait_ms: waited.as_millis() as u64,
            remaining_operations: remaining,
            marker_path: self.policy.marker_path.clone(),
        };
        self.push_history(record.clone());
        self.metrics.inc_restarts(forced);

        let report = RestartReport {
            record,
            cleanup,
            marker,
            drain_timeout: drain_timeout.map(|e| e.to_string()),
        };

        // (f) hand back
        if self.report_tx.try_send(report.clone()).is_err() {
            warn!("No receiver for restart report");
        }
        info!(reason = %reason, forced = forced, "Restart executed");
        Ok(report)
    }

    /// Wait for active operations, up to the grace period
    async fn drain(&self) -> (Duration, Option<ControllerError>) {
        let start = Instant::now();
        let deadline = start + self.policy.grace_period();
        let poll = self.policy.drain_poll_interval();

        loop {
            if self.operations.is_empty() {
                return (start.elapsed(), None);
            }

            let now = Instant::now();
            if now >= deadline {
                let waited = start.elapsed();
                let remaining = self.operations.len();
                self.logger.log_restart_forced(remaining, waited.as_millis());
                return (
                    waited,
                    Some(ControllerError::RestartDrainTimeout { waited, remaining }),
                );
            }

            let wait = poll.min(deadline - now);
            tokio::select! {
                _ = self.operations.finished() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn push_history(&self, record: RestartRecord) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        if history.len() >= self.policy.history_len.max(1) {
            history.pop_front();
        }
        history.push_back(record);
    }

    pub fn status(&self) -> RestartStatus {
        RestartStatus {
            restart_in_progress: self.in_progress(),
            recommendation: self
                .last_recommendation
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            history: self
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned()
                .collect(),
            active_operation_count: self.operations.len(),
            active_operations: self.operations.list(),
        }
    }
}

#[cfg(test)]
mod tests;
