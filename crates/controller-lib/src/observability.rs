//! Observability infrastructure for the health controller
//!
//! Provides:
//! - Prometheus metrics (health score, resource gauges, cleanup/eviction/restart counters)
//! - Structured JSON logging with tracing

use crate::models::{AlertKind, AlertSeverity, EmergencyLevel, Snapshot};
use prometheus::{
    register_counter, register_gauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge, Counter, Gauge, Histogram, IntCounter,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

const RATIO_BUCKETS: &[f64] = &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0];

const PACING_BUCKETS: &[f64] = &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ControllerMetricsInner> = OnceLock::new();

struct ControllerMetricsInner {
    health_score: Gauge,
    memory_mb: Gauge,
    cpu_percent: Gauge,
    active_sessions: IntGauge,
    emergency_level: IntGauge,
    active_operations: IntGauge,
    alerts_raised: IntCounterVec,
    cleanups: IntCounterVec,
    cleanup_failures: IntCounter,
    freed_memory_mb: Counter,
    collection_failures: IntCounter,
    sessions_evicted: IntCounterVec,
    restarts: IntCounterVec,
    tick_latency_seconds: Histogram,
    compression_ratio: Histogram,
    pacing_interval_seconds: Histogram,
}

impl ControllerMetricsInner {
    fn new() -> Self {
        Self {
            health_score: register_gauge!(
                "health_controller_health_score",
                "Composite health score (0-100)"
            )
            .expect("Failed to register health_score"),

            memory_mb: register_gauge!(
                "health_controller_memory_mb",
                "Resident memory of the process in MB"
            )
            .expect("Failed to register memory_mb"),

            cpu_percent: register_gauge!(
                "health_controller_cpu_percent",
                "Process CPU usage percent across all cores"
            )
            .expect("Failed to register cpu_percent"),

            active_sessions: register_int_gauge!(
                "health_controller_active_sessions",
                "Number of conversation sessions currently registered"
            )
            .expect("Failed to register active_sessions"),

            emergency_level: register_int_gauge!(
                "health_controller_emergency_level",
                "Current emergency level (0=normal, 1=warning, 2=critical, 3=emergency)"
            )
            .expect("Failed to register emergency_level"),

            active_operations: register_int_gauge!(
                "health_controller_active_operations",
                "Operations currently marked active"
            )
            .expect("Failed to register active_operations"),

            alerts_raised: register_int_counter_vec!(
                "health_controller_alerts_raised_total",
                "Alerts recorded after de-duplication",
                &["kind", "severity"]
            )
            .expect("Failed to register alerts_raised"),

            cleanups: register_int_counter_vec!(
                "health_controller_cleanups_total",
                "Cleanup cycles run",
                &["tier"]
            )
            .expect("Failed to register cleanups"),

            cleanup_failures: register_int_counter!(
                "health_controller_cleanup_failures_total",
                "Cleanup steps that returned an error"
            )
            .expect("Failed to register cleanup_failures"),

            freed_memory_mb: register_counter!(
                "health_controller_freed_memory_mb_total",
                "Memory reported freed by cleanup steps"
            )
            .expect("Failed to register freed_memory_mb"),

            collection_failures: register_int_counter!(
                "health_controller_collection_failures_total",
                "Snapshot reads that fell back to the last-known snapshot"
            )
            .expect("Failed to register collection_failures"),

            sessions_evicted: register_int_counter_vec!(
                "health_controller_sessions_evicted_total",
                "Sessions removed from the registry",
                &["rule"]
            )
            .expect("Failed to register sessions_evicted"),

            restarts: register_int_counter_vec!(
                "health_controller_restarts_total",
                "Restarts executed",
                &["forced"]
            )
            .expect("Failed to register restarts"),

            tick_latency_seconds: register_histogram!(
                "health_controller_tick_latency_seconds",
                "Time spent in one health monitoring tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            compression_ratio: register_histogram!(
                "health_controller_compression_ratio",
                "Fraction of messages removed per compression pass",
                RATIO_BUCKETS.to_vec()
            )
            .expect("Failed to register compression_ratio"),

            pacing_interval_seconds: register_histogram!(
                "health_controller_pacing_interval_seconds",
                "Recommended streaming emission interval",
                PACING_BUCKETS.to_vec()
            )
            .expect("Failed to register pacing_interval_seconds"),
        }
    }
}

/// Controller metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    _private: (),
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerMetrics").finish()
    }
}

impl ControllerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ControllerMetricsInner {
        GLOBAL_METRICS.get_or_init(ControllerMetricsInner::new)
    }

    /// Publish the resource readings of a snapshot
    pub fn observe_snapshot(&self, snapshot: &Snapshot) {
        self.inner().memory_mb.set(snapshot.memory_mb);
        self.inner().cpu_percent.set(snapshot.cpu_percent);
    }

    pub fn set_health_score(&self, score: f64) {
        self.inner().health_score.set(score);
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.inner().active_sessions.set(count as i64);
    }

    pub fn set_emergency_level(&self, level: EmergencyLevel) {
        self.inner().emergency_level.set(level.rank());
    }

    pub fn set_active_operations(&self, count: usize) {
        self.inner().active_operations.set(count as i64);
    }

    pub fn inc_alert(&self, kind: AlertKind, severity: AlertSeverity) {
        let kind = kind.to_string();
        let severity = severity.to_string();
        self.inner()
            .alerts_raised
            .with_label_values(&[kind.as_str(), severity.as_str()])
            .inc();
    }

    pub fn inc_cleanup(&self, tier: &str) {
        self.inner().cleanups.with_label_values(&[tier]).inc();
    }

    pub fn inc_cleanup_failures(&self, count: u64) {
        self.inner().cleanup_failures.inc_by(count);
    }

    /// Add freed memory; non-positive amounts are ignored
    pub fn add_freed_memory(&self, mb: f64) {
        if mb > 0.0 {
            self.inner().freed_memory_mb.inc_by(mb);
        }
    }

    pub fn inc_collection_failures(&self) {
        self.inner().collection_failures.inc();
    }

    pub fn inc_sessions_evicted(&self, rule: &str, count: usize) {
        if count > 0 {
            self.inner()
                .sessions_evicted
                .with_label_values(&[rule])
                .inc_by(count as u64);
        }
    }

    pub fn inc_restarts(&self, forced: bool) {
        let label = if forced { "true" } else { "false" };
        self.inner().restarts.with_label_values(&[label]).inc();
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn observe_compression_ratio(&self, ratio: f64) {
        self.inner().compression_ratio.observe(ratio);
    }

    pub fn observe_pacing_interval(&self, seconds: f64) {
        self.inner().pacing_interval_seconds.observe(seconds);
    }
}

/// Structured logger for controller events
///
/// Provides consistent JSON-formatted logging for level transitions,
/// cleanups, evictions and restarts.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            "Health controller started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Health controller shutting down"
        );
    }

    /// Log an emergency level transition
    pub fn log_level_change(&self, from: EmergencyLevel, to: EmergencyLevel, memory_mb: f64) {
        if to > from {
            warn!(
                event = "emergency_level_changed",
                instance = %self.instance,
                from = %from,
                to = %to,
                memory_mb = memory_mb,
                "Emergency level escalated"
            );
        } else {
            info!(
                event = "emergency_level_changed",
                instance = %self.instance,
                from = %from,
                to = %to,
                memory_mb = memory_mb,
                "Emergency level relaxed"
            );
        }
    }

    /// Log a recorded alert
    pub fn log_alert(
        &self,
        kind: AlertKind,
        severity: AlertSeverity,
        value: f64,
        threshold: f64,
        message: &str,
    ) {
        match severity {
            AlertSeverity::Error | AlertSeverity::Critical => {
                warn!(
                    event = "alert_raised",
                    instance = %self.instance,
                    kind = %kind,
                    severity = %severity,
                    value = value,
                    threshold = threshold,
                    details = %message,
                    "Resource alert raised"
                );
            }
            _ => {
                info!(
                    event = "alert_raised",
                    instance = %self.instance,
                    kind = %kind,
                    severity = %severity,
                    value = value,
                    threshold = threshold,
                    details = %message,
                    "Resource alert raised"
                );
            }
        }
    }

    /// Log a finished cleanup cycle
    pub fn log_cleanup(
        &self,
        tier: &str,
        steps_run: usize,
        steps_failed: usize,
        freed_memory_mb: f64,
        sessions_closed: usize,
    ) {
        if steps_failed > 0 {
            warn!(
                event = "cleanup_completed",
                instance = %self.instance,
                tier = %tier,
                steps_run = steps_run,
                steps_failed = steps_failed,
                freed_memory_mb = freed_memory_mb,
                sessions_closed = sessions_closed,
                "Cleanup completed with failures"
            );
        } else {
            info!(
                event = "cleanup_completed",
                instance = %self.instance,
                tier = %tier,
                steps_run = steps_run,
                freed_memory_mb = freed_memory_mb,
                sessions_closed = sessions_closed,
                "Cleanup completed"
            );
        }
    }

    /// Log sessions removed by a registry sweep
    pub fn log_sessions_evicted(&self, idle: usize, inactive: usize, stale: usize) {
        info!(
            event = "sessions_evicted",
            instance = %self.instance,
            idle = idle,
            inactive = inactive,
            stale = stale,
            "Session sweep evicted sessions"
        );
    }

    /// Log the start of a restart
    pub fn log_restart_initiated(&self, reason: &str, active_operations: usize) {
        warn!(
            event = "restart_initiated",
            instance = %self.instance,
            reason = %reason,
            active_operations = active_operations,
            "Graceful restart initiated"
        );
    }

    /// Log a restart that proceeded while operations were still active
    pub fn log_restart_forced(&self, remaining: usize, waited_ms: u128) {
        warn!(
            event = "restart_forced",
            instance = %self.instance,
            remaining_operations = remaining,
            waited_ms = waited_ms as u64,
            "Grace period expired, forcing restart over active operations"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_metrics_creation() {
        let metrics = ControllerMetrics::new();

        metrics.observe_snapshot(&Snapshot::empty());
        metrics.set_health_score(87.5);
        metrics.set_active_sessions(3);
        metrics.set_emergency_level(EmergencyLevel::Warning);
        metrics.inc_alert(AlertKind::Memory, AlertSeverity::Warning);
        metrics.inc_cleanup("standard");
        metrics.add_freed_memory(12.0);
        metrics.add_freed_memory(-1.0);
        metrics.inc_sessions_evicted("stale", 0);
        metrics.observe_tick_latency(0.002);
        metrics.observe_compression_ratio(0.475);
        metrics.observe_pacing_interval(2.5);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-instance");
        assert_eq!(logger.instance(), "test-instance");
    }
}
