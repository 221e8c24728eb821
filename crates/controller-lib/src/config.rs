//! Controller configuration
//!
//! Plain serde types with defaults. Loading (file + environment) is done by
//! the binary; this module only owns the shape of the values and the checks
//! that must pass before any component starts.

use crate::error::{ControllerError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Instance name used in structured logs
    pub instance_name: String,
    /// Port for the status API
    pub api_port: u16,
    pub monitor: MonitorSettings,
    pub limits: ResourceLimits,
    pub alerts: AlertThresholds,
    pub emergency: EmergencyThresholds,
    pub sessions: SessionSettings,
    pub restart: RestartPolicy,
    pub compression: CompressionSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            instance_name: "health-controller".to_string(),
            api_port: 8080,
            monitor: MonitorSettings::default(),
            limits: ResourceLimits::default(),
            alerts: AlertThresholds::default(),
            emergency: EmergencyThresholds::default(),
            sessions: SessionSettings::default(),
            restart: RestartPolicy::default(),
            compression: CompressionSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Check every section; any failure is fatal at startup
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        self.limits.validate()?;
        self.alerts.validate()?;
        self.emergency.validate()?;
        self.sessions.validate()?;
        self.restart.validate()?;
        self.compression.validate()?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ControllerError {
    ControllerError::ConfigurationError(message.into())
}

/// Loop timing and rolling-window sizes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub health_interval_secs: u64,
    /// Health interval used while CPU throttling is active
    pub degraded_health_interval_secs: u64,
    pub alert_interval_secs: u64,
    pub session_cleanup_interval_secs: u64,
    /// Maximum jitter added to the health interval
    pub jitter_ms: u64,
    /// Rolling window for alert history
    pub alert_window_secs: u64,
    /// Window in which an identical (kind, severity) alert is suppressed
    pub alert_dedup_secs: u64,
    /// Number of health scores retained for trend analysis
    pub health_history_len: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            degraded_health_interval_secs: 60,
            alert_interval_secs: 60,
            session_cleanup_interval_secs: 300,
            jitter_ms: 1000,
            alert_window_secs: 3600,
            alert_dedup_secs: 15 * 60,
            health_history_len: 120,
        }
    }
}

impl MonitorSettings {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn degraded_health_interval(&self) -> Duration {
        Duration::from_secs(self.degraded_health_interval_secs)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_secs)
    }

    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_secs(self.alert_window_secs)
    }

    pub fn alert_dedup_window(&self) -> Duration {
        Duration::from_secs(self.alert_dedup_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.health_interval_secs == 0
            || self.degraded_health_interval_secs == 0
            || self.alert_interval_secs == 0
            || self.session_cleanup_interval_secs == 0
        {
            return Err(invalid("monitor intervals must be greater than zero"));
        }
        if self.alert_window_secs == 0 {
            return Err(invalid("monitor.alert_window_secs must be greater than zero"));
        }
        if self.health_history_len == 0 {
            return Err(invalid("monitor.health_history_len must be greater than zero"));
        }
        Ok(())
    }
}

/// Limits used to turn raw readings into utilization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub memory_limit_mb: f64,
    pub cpu_limit_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 1000.0,
            cpu_limit_percent: 100.0,
        }
    }
}

impl ResourceLimits {
    fn validate(&self) -> Result<()> {
        if !(self.memory_limit_mb > 0.0) {
            return Err(invalid("limits.memory_limit_mb must be positive"));
        }
        if !(self.cpu_limit_percent > 0.0) {
            return Err(invalid("limits.cpu_limit_percent must be positive"));
        }
        Ok(())
    }
}

/// Per-severity thresholds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub info: f64,
    pub warning: f64,
    pub error: f64,
    pub critical: f64,
}

impl SeverityThresholds {
    pub const fn new(info: f64, warning: f64, error: f64, critical: f64) -> Self {
        Self {
            info,
            warning,
            error,
            critical,
        }
    }

    fn validate(&self, metric: &str) -> Result<()> {
        let values = [self.info, self.warning, self.error, self.critical];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(invalid(format!(
                "alerts.{metric} thresholds must be finite and non-negative"
            )));
        }
        if values.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(format!(
                "alerts.{metric} thresholds must ascend info < warning < error < critical"
            )));
        }
        Ok(())
    }
}

/// Alert threshold table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Process memory in MB
    pub memory: SeverityThresholds,
    /// Process CPU percent
    pub cpu: SeverityThresholds,
    /// Disk usage percent
    pub disk: SeverityThresholds,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            memory: SeverityThresholds::new(300.0, 400.0, 600.0, 800.0),
            cpu: SeverityThresholds::new(50.0, 70.0, 85.0, 95.0),
            disk: SeverityThresholds::new(70.0, 80.0, 90.0, 95.0),
        }
    }
}

impl AlertThresholds {
    fn validate(&self) -> Result<()> {
        self.memory.validate("memory")?;
        self.cpu.validate("cpu")?;
        self.disk.validate("disk")?;
        Ok(())
    }
}

/// Memory tiers for the emergency controller and its cleanup plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyThresholds {
    pub warning_mb: f64,
    pub critical_mb: f64,
    /// Within the critical tier, restart recommendations become high severity
    pub high_mb: f64,
    pub emergency_mb: f64,
    /// CPU percent at which output throttling is switched on
    pub cpu_throttle_percent: f64,
    /// Sessions idle longer than this are closed by emergency cleanup
    pub idle_session_close_mins: u64,
    /// Concurrent cleanup steps
    pub max_cleanup_workers: usize,
    /// Directory swept for temporary artifacts, if any
    pub temp_dir: Option<PathBuf>,
    /// Temporary artifacts older than this are removed
    pub temp_max_age_mins: u64,
}

impl Default for EmergencyThresholds {
    fn default() -> Self {
        Self {
            warning_mb: 400.0,
            critical_mb: 600.0,
            high_mb: 800.0,
            emergency_mb: 1000.0,
            cpu_throttle_percent: 85.0,
            idle_session_close_mins: 30,
            max_cleanup_workers: 4,
            temp_dir: None,
            temp_max_age_mins: 60,
        }
    }
}

impl EmergencyThresholds {
    pub fn idle_session_close_after(&self) -> Duration {
        Duration::from_secs(self.idle_session_close_mins * 60)
    }

    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_mins * 60)
    }

    fn validate(&self) -> Result<()> {
        let tiers = [self.warning_mb, self.critical_mb, self.high_mb, self.emergency_mb];
        if tiers.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(invalid("emergency thresholds must be positive"));
        }
        if tiers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(
                "emergency thresholds must ascend warning < critical < high < emergency",
            ));
        }
        if self.max_cleanup_workers == 0 {
            return Err(invalid("emergency.max_cleanup_workers must be at least 1"));
        }
        Ok(())
    }
}

/// Session capacity and eviction timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub max_sessions: usize,
    /// Sessions evicted when registering at capacity
    pub eviction_batch: usize,
    pub idle_timeout_secs: u64,
    pub inactive_timeout_secs: u64,
    pub stale_timeout_secs: u64,
    /// Memory estimate above which an inactive session is evicted
    pub inactive_memory_mb: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            eviction_batch: 5,
            idle_timeout_secs: 30 * 60,
            inactive_timeout_secs: 2 * 60 * 60,
            stale_timeout_secs: 24 * 60 * 60,
            inactive_memory_mb: 10.0,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn inactive_timeout(&self) -> Duration {
        Duration::from_secs(self.inactive_timeout_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(invalid("sessions.max_sessions must be at least 1"));
        }
        if self.eviction_batch == 0 {
            return Err(invalid("sessions.eviction_batch must be at least 1"));
        }
        if self.idle_timeout_secs > self.stale_timeout_secs
            || self.inactive_timeout_secs > self.stale_timeout_secs
        {
            return Err(invalid(
                "sessions.stale_timeout_secs must not be shorter than idle or inactive timeouts",
            ));
        }
        Ok(())
    }
}

/// Longest drain a restart may wait for (one day)
const MAX_GRACE_PERIOD_MINS: f64 = 24.0 * 60.0;

/// Restart triggers and drain behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    /// Maximum wait for active operations before forcing the restart
    pub grace_period_mins: f64,
    pub drain_poll_ms: u64,
    pub uptime_soft_limit_hours: f64,
    pub uptime_hard_limit_hours: f64,
    pub low_health_score: f64,
    pub critical_health_score: f64,
    /// Session count at which a restart is recommended
    pub session_threshold: usize,
    /// Health drop across the history window that counts as a falling trend
    pub health_drop_threshold: f64,
    pub marker_path: PathBuf,
    pub history_len: usize,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            grace_period_mins: 5.0,
            drain_poll_ms: 1000,
            uptime_soft_limit_hours: 24.0,
            uptime_hard_limit_hours: 72.0,
            low_health_score: 50.0,
            critical_health_score: 30.0,
            session_threshold: 90,
            health_drop_threshold: 30.0,
            marker_path: PathBuf::from("restart_marker.json"),
            history_len: 20,
        }
    }
}

impl RestartPolicy {
    pub fn grace_period(&self) -> Duration {
        let mins = self.grace_period_mins.clamp(0.0, MAX_GRACE_PERIOD_MINS);
        Duration::try_from_secs_f64(mins * 60.0).unwrap_or(Duration::ZERO)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_ms.max(1))
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=MAX_GRACE_PERIOD_MINS).contains(&self.grace_period_mins) {
            return Err(invalid(format!(
                "restart.grace_period_mins must be between 0 and {MAX_GRACE_PERIOD_MINS}"
            )));
        }
        if self.uptime_soft_limit_hours > self.uptime_hard_limit_hours {
            return Err(invalid(
                "restart.uptime_soft_limit_hours must not exceed the hard limit",
            ));
        }
        if self.critical_health_score > self.low_health_score {
            return Err(invalid(
                "restart.critical_health_score must not exceed low_health_score",
            ));
        }
        Ok(())
    }
}

/// Conversation compression defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Token budget per compression call
    pub token_budget: usize,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self { token_budget: 8000 }
    }
}

impl CompressionSettings {
    fn validate(&self) -> Result<()> {
        if self.token_budget == 0 {
            return Err(invalid("compression.token_budget must be greater than zero"));
        }
        Ok(())
    }
}
