//! Composite health scoring
//!
//! Turns a snapshot, the live session count and the recent alert count into a
//! single 0-100 value:
//!
//! `0.30 * memory + 0.25 * cpu + 0.25 * sessions + 0.20 * alerts`
//!
//! Each part is `max(0, 100 - utilization * 100)`; the alert part loses ten
//! points per recent alert.

use crate::config::ResourceLimits;
use crate::models::{HealthScore, Snapshot};
use std::collections::VecDeque;

const MEMORY_WEIGHT: f64 = 0.30;
const CPU_WEIGHT: f64 = 0.25;
const SESSION_WEIGHT: f64 = 0.25;
const ALERT_WEIGHT: f64 = 0.20;

/// Points removed from the alert part per recent alert
const ALERT_PENALTY: f64 = 10.0;

/// Ceiling for memory and CPU parts when the snapshot is a reused reading
const STALE_COMPONENT_CAP: f64 = 50.0;

/// Stateless health scorer
#[derive(Debug, Clone)]
pub struct HealthScorer {
    memory_limit_mb: f64,
    cpu_limit_percent: f64,
    max_sessions: usize,
}

impl HealthScorer {
    pub fn new(limits: &ResourceLimits, max_sessions: usize) -> Self {
        Self {
            memory_limit_mb: limits.memory_limit_mb,
            cpu_limit_percent: limits.cpu_limit_percent,
            max_sessions,
        }
    }

    /// Score one tick
    pub fn score(
        &self,
        snapshot: &Snapshot,
        session_count: usize,
        recent_alert_count: usize,
    ) -> HealthScore {
        let mut memory_component = headroom(snapshot.memory_mb, self.memory_limit_mb);
        let mut cpu_component = headroom(snapshot.cpu_percent, self.cpu_limit_percent);
        if snapshot.stale {
            memory_component = memory_component.min(STALE_COMPONENT_CAP);
            cpu_component = cpu_component.min(STALE_COMPONENT_CAP);
        }

        let session_component = headroom(session_count as f64, self.max_sessions as f64);
        let alert_component = (100.0 - ALERT_PENALTY * recent_alert_count as f64).max(0.0);

        let value = MEMORY_WEIGHT * memory_component
            + CPU_WEIGHT * cpu_component
            + SESSION_WEIGHT * session_component
            + ALERT_WEIGHT * alert_component;

        HealthScore {
            value: round_one_decimal(value.clamp(0.0, 100.0)),
            memory_component,
            cpu_component,
            session_component,
            alert_component,
            timestamp: snapshot.timestamp,
        }
    }
}

/// `max(0, 100 - current / limit * 100)`; a non-positive limit counts as exhausted
fn headroom(current: f64, limit: f64) -> f64 {
    if limit <= 0.0 || !current.is_finite() {
        return 0.0;
    }
    (100.0 - current.max(0.0) / limit * 100.0).clamp(0.0, 100.0)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Bounded rolling window of health scores
#[derive(Debug, Clone)]
pub struct HealthHistory {
    scores: VecDeque<HealthScore>,
    capacity: usize,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            scores: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, score: HealthScore) {
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores.push_back(score);
    }

    pub fn latest(&self) -> Option<&HealthScore> {
        self.scores.back()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Last value minus first value over the window; zero with fewer than two scores
    pub fn trend(&self) -> f64 {
        match (self.scores.front(), self.scores.back()) {
            (Some(first), Some(last)) if self.scores.len() > 1 => last.value - first.value,
            _ => 0.0,
        }
    }

    pub fn average(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        let sum: f64 = self.scores.iter().map(|s| s.value).sum();
        Some(sum / self.scores.len() as f64)
    }
}
