//! API client for the health controller status surface

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Client for the controller's HTTP status API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// GET a JSON document
    ///
    /// `/readyz`-style 503 bodies are still JSON, so callers that care about
    /// them use [`get_allowing`](Self::get_allowing).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_allowing(path, &[]).await
    }

    /// GET a JSON document, also accepting the listed non-success statuses
    pub async fn get_allowing<T: DeserializeOwned>(&self, path: &str, allowed: &[u16]) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach health controller")?;

        let status = response.status();
        if !status.is_success() && !allowed.contains(&status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        self.get("health").await
    }

    pub async fn readiness(&self) -> Result<Readiness> {
        self.get_allowing("readyz", &[503]).await
    }

    pub async fn resources(&self) -> Result<ResourceStatus> {
        self.get("resources/status").await
    }

    pub async fn restart_status(&self) -> Result<RestartStatus> {
        self.get("restart/status").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub health_score: Option<f64>,
    pub emergency_level: String,
    #[serde(default)]
    pub active_sessions: usize,
    #[serde(default)]
    pub active_operations: usize,
    #[serde(default)]
    pub restart_in_progress: bool,
    #[serde(default)]
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetIo {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub uptime_hours: f64,
    pub active_threads: u32,
    pub open_files: u32,
    pub disk_usage_percent: f64,
    pub net_io_bytes: NetIo,
    pub timestamp: i64,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub value: f64,
    pub memory_component: f64,
    pub cpu_component: f64,
    pub session_component: f64,
    pub alert_component: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: String,
    pub kind: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    pub current_resources: Option<Snapshot>,
    pub health_score: Option<f64>,
    #[serde(default)]
    pub score_breakdown: Option<ScoreBreakdown>,
    #[serde(default)]
    pub health_trend: f64,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyStatus {
    pub level: String,
    pub emergency_mode: bool,
    pub cpu_throttling: bool,
    pub emergency_cleanups: u64,
    #[serde(default)]
    pub standard_cleanups: u64,
    #[serde(default)]
    pub freed_memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub health: HealthSection,
    pub emergency: EmergencyStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRecommendation {
    pub should_restart: bool,
    pub reasons: Vec<String>,
    pub severity: String,
    pub recommended_delay_minutes: Option<u64>,
    pub evaluated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRecord {
    pub timestamp: String,
    pub reason: String,
    pub forced: bool,
    pub drain_wait_ms: u64,
    pub remaining_operations: usize,
    pub marker_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveOperation {
    pub id: u64,
    pub label: String,
    pub started_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartStatus {
    pub restart_in_progress: bool,
    pub recommendation: Option<RestartRecommendation>,
    pub history: Vec<RestartRecord>,
    pub active_operation_count: usize,
    #[serde(default)]
    pub active_operations: Vec<ActiveOperation>,
}
