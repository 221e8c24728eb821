//! Core data models for the health controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Network byte counters since host boot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetIo {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// One immutable read of process and host resource usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Resident memory of this process
    pub memory_mb: f64,
    /// Process CPU usage, normalised to 0-100 across all cores
    pub cpu_percent: f64,
    pub uptime_hours: f64,
    pub active_threads: u32,
    pub open_files: u32,
    pub disk_usage_percent: f64,
    pub net_io_bytes: NetIo,
    pub timestamp: i64,
    /// Set when the reading is a reused last-known snapshot
    #[serde(default)]
    pub stale: bool,
}

impl Snapshot {
    /// Zeroed snapshot used before any successful reading exists
    pub fn empty() -> Self {
        Self {
            memory_mb: 0.0,
            cpu_percent: 0.0,
            uptime_hours: 0.0,
            active_threads: 0,
            open_files: 0,
            disk_usage_percent: 0.0,
            net_io_bytes: NetIo::default(),
            timestamp: Utc::now().timestamp(),
            stale: false,
        }
    }

    /// Copy of this snapshot marked stale
    pub fn into_stale(mut self) -> Self {
        self.stale = true;
        self
    }
}

/// Composite 0-100 health value with its weighted parts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    pub value: f64,
    pub memory_component: f64,
    pub cpu_component: f64,
    pub session_component: f64,
    pub alert_component: f64,
    pub timestamp: i64,
}

/// Alert severity tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Error => write!(f, "error"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// What an alert was raised for
///
/// `Collection` and `Cleanup` report the controller's own degradation: a tick
/// that ran on a stale snapshot, or a cleanup cycle with failed steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Memory,
    Cpu,
    Disk,
    Collection,
    Cleanup,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Memory => write!(f, "memory"),
            AlertKind::Cpu => write!(f, "cpu"),
            AlertKind::Disk => write!(f, "disk"),
            AlertKind::Collection => write!(f, "collection"),
            AlertKind::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// A single threshold breach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: i64,
}

/// Memory-driven escalation tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl EmergencyLevel {
    /// Numeric rank used for the level gauge
    pub const fn rank(self) -> i64 {
        match self {
            EmergencyLevel::Normal => 0,
            EmergencyLevel::Warning => 1,
            EmergencyLevel::Critical => 2,
            EmergencyLevel::Emergency => 3,
        }
    }
}

impl std::fmt::Display for EmergencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyLevel::Normal => write!(f, "normal"),
            EmergencyLevel::Warning => write!(f, "warning"),
            EmergencyLevel::Critical => write!(f, "critical"),
            EmergencyLevel::Emergency => write!(f, "emergency"),
        }
    }
}

/// Urgency of a restart recommendation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RestartSeverity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RestartSeverity {
    /// Suggested wait before restarting at this severity
    pub const fn recommended_delay_minutes(self) -> Option<u64> {
        match self {
            RestartSeverity::None => None,
            RestartSeverity::Low => Some(120),
            RestartSeverity::Medium => Some(30),
            RestartSeverity::High => Some(5),
            RestartSeverity::Critical => Some(0),
        }
    }
}

impl std::fmt::Display for RestartSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartSeverity::None => write!(f, "none"),
            RestartSeverity::Low => write!(f, "low"),
            RestartSeverity::Medium => write!(f, "medium"),
            RestartSeverity::High => write!(f, "high"),
            RestartSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// An active conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub estimated_memory_mb: f64,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            message_count: 0,
            estimated_memory_mb: 0.0,
        }
    }

    /// Time since the last recorded activity, zero if the clock went backwards
    pub fn inactive_for(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Output of a tool invocation relayed into the conversation
    Tool,
}

/// Retention tier assigned by the compressor, ordered from least to most important
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// One conversation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub priority: Priority,
    #[serde(default)]
    pub is_summary: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            priority: Priority::Medium,
            is_summary: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, Utc::now())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, Utc::now())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, Utc::now())
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content, Utc::now())
    }

    /// Token estimate using the fixed four-characters-per-token heuristic
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count() / 4
    }
}
