//! Tiered emergency response
//!
//! This module provides:
//! - Memory-driven level classification (normal, warning, critical, emergency)
//! - A level state machine that only relaxes after a cleanup cycle completes
//! - Cleanup dispatch per tier and restart requests for the upper tiers
//! - The CPU throttling flag consulted by the monitoring loop and the pacer

mod cleanup;
mod steps;

#[cfg(test)]
mod tests;

pub use cleanup::{CleanupPlan, CleanupReport, CleanupStep, CleanupTier, HookStep, StepOutcome};
pub use steps::{IdleSessionSweep, TempArtifactSweep};

use crate::config::EmergencyThresholds;
use crate::models::{EmergencyLevel, RestartSeverity, Snapshot};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::sessions::SessionRegistry;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Restart requested by the emergency controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub severity: RestartSeverity,
    pub reason: String,
    /// Execute now rather than only recommending
    pub immediate: bool,
}

/// Result of handling one snapshot
#[derive(Debug, Clone)]
pub struct EmergencyOutcome {
    pub previous: EmergencyLevel,
    pub level: EmergencyLevel,
    pub cpu_throttling: bool,
    pub cleanup: Option<CleanupReport>,
    pub restart: Option<RestartRequest>,
}

/// Externally visible emergency state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    pub level: EmergencyLevel,
    pub emergency_mode: bool,
    pub cpu_throttling: bool,
    pub emergency_cleanups: u64,
    pub standard_cleanups: u64,
    pub freed_memory_mb: f64,
    pub last_cleanup: Option<CleanupReport>,
}

#[derive(Debug)]
struct EmergencyState {
    level: EmergencyLevel,
    /// A cleanup cycle finished since `level` was entered
    cleaned_since_entered: bool,
    cpu_throttling: bool,
    emergency_cleanups: u64,
    standard_cleanups: u64,
    freed_memory_mb: f64,
    last_cleanup: Option<CleanupReport>,
}

impl Default for EmergencyState {
    fn default() -> Self {
        Self {
            level: EmergencyLevel::Normal,
            cleaned_since_entered: true,
            cpu_throttling: false,
            emergency_cleanups: 0,
            standard_cleanups: 0,
            freed_memory_mb: 0.0,
            last_cleanup: None,
        }
    }
}

/// Owner of the emergency level state machine
pub struct EmergencyController {
    thresholds: EmergencyThresholds,
    plan: Arc<CleanupPlan>,
    sessions: Arc<SessionRegistry>,
    state: Mutex<EmergencyState>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl EmergencyController {
    pub fn new(
        thresholds: EmergencyThresholds,
        plan: Arc<CleanupPlan>,
        sessions: Arc<SessionRegistry>,
        metrics: ControllerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            thresholds,
            plan,
            sessions,
            state: Mutex::new(EmergencyState::default()),
            metrics,
            logger,
        }
    }

    /// Level for a memory reading, ignoring transition rules
    pub fn classify(&self, memory_mb: f64) -> EmergencyLevel {
        let t = &self.thresholds;
        if memory_mb >= t.emergency_mb {
            EmergencyLevel::Emergency
        } else if memory_mb >= t.critical_mb {
            EmergencyLevel::Critical
        } else if memory_mb >= t.warning_mb {
            EmergencyLevel::Warning
        } else {
            EmergencyLevel::Normal
        }
    }

    pub fn level(&self) -> EmergencyLevel {
        self.lock_state().level
    }

    pub fn cpu_throttling(&self) -> bool {
        self.lock_state().cpu_throttling
    }

    pub fn status(&self) -> EmergencyStatus {
        let state = self.lock_state();
        EmergencyStatus {
            level: state.level,
            emergency_mode: state.level >= EmergencyLevel::Critical,
            cpu_throttling: state.cpu_throttling,
            emergency_cleanups: state.emergency_cleanups,
            standard_cleanups: state.standard_cleanups,
            freed_memory_mb: state.freed_memory_mb,
            last_cleanup: state.last_cleanup.clone(),
        }
    }

    /// Apply one snapshot: transition, cleanup, and restart request
    pub async fn handle(&self, snapshot: &Snapshot) -> EmergencyOutcome {
        let target = self.classify(snapshot.memory_mb);

        let (previous, level, cpu_throttling) = {
            let mut state = self.lock_state();
            let previous = state.level;

            let level = if target < previous && !state.cleaned_since_entered {
                debug!(
                    held = %previous,
                    target = %target,
                    "Holding emergency level until a cleanup cycle completes"
                );
                previous
            } else {
                target
            };

            if level != previous {
                state.level = level;
                state.cleaned_since_entered = false;
                self.logger.log_level_change(previous, level, snapshot.memory_mb);
                self.metrics.set_emergency_level(level);
            }

            state.cpu_throttling = snapshot.cpu_percent >= self.thresholds.cpu_throttle_percent
                || level >= EmergencyLevel::Critical;

            (previous, level, state.cpu_throttling)
        };

        self.sessions.set_admission_paused(level == EmergencyLevel::Emergency);

        let tier = match level {
            EmergencyLevel::Normal => None,
            EmergencyLevel::Warning => Some(CleanupTier::Standard),
            EmergencyLevel::Critical | EmergencyLevel::Emergency => Some(CleanupTier::Emergency),
        };

        let cleanup = match tier {
            Some(tier) => {
                let report = self.plan.run(tier).await;
                self.record_cleanup(&report);
                Some(report)
            }
            None => None,
        };

        EmergencyOutcome {
            previous,
            level,
            cpu_throttling,
            cleanup,
            restart: self.restart_request(level, snapshot.memory_mb),
        }
    }

    fn record_cleanup(&self, report: &CleanupReport) {
        let mut state = self.lock_state();
        match report.tier {
            CleanupTier::Standard => state.standard_cleanups += 1,
            CleanupTier::Emergency => state.emergency_cleanups += 1,
        }
        state.freed_memory_mb += report.freed_memory_mb;
        state.cleaned_since_entered = true;
        state.last_cleanup = Some(report.clone());
    }

    fn restart_request(&self, level: EmergencyLevel, memory_mb: f64) -> Option<RestartRequest> {
        match level {
            EmergencyLevel::Normal | EmergencyLevel::Warning => None,
            EmergencyLevel::Critical => {
                let severity = if memory_mb >= self.thresholds.high_mb {
                    RestartSeverity::High
                } else {
                    RestartSeverity::Medium
                };
                Some(RestartRequest {
                    severity,
                    reason: format!("memory {memory_mb:.1}MB in critical tier"),
                    immediate: false,
                })
            }
            EmergencyLevel::Emergency => Some(RestartRequest {
                severity: RestartSeverity::Critical,
                reason: format!(
                    "memory {memory_mb:.1}MB reached emergency threshold {:.1}MB",
                    self.thresholds.emergency_mb
                ),
                immediate: true,
            }),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EmergencyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
