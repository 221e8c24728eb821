//! HTTP status surface
//!
//! - `GET /health`: overall status, score and emergency level; always 200
//! - `GET /resources/status`: latest snapshot, score, recent alerts,
//!   recommendations and emergency state
//! - `GET /restart/status`: current restart recommendation and history
//! - `GET /readyz`: 503 until initialised or while a restart runs
//! - `GET /metrics`: Prometheus text exposition

use crate::emergency::EmergencyStatus;
use crate::health::{ComponentHealth, ComponentStatus, ReadinessResponse};
use crate::models::{Alert, EmergencyLevel, HealthScore, Snapshot};
use crate::monitor::ControllerHandle;
use crate::restart::{RestartRecommendation, RestartStatus};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Alerts included in `/resources/status`
const STATUS_ALERT_LIMIT: usize = 20;

/// Overall status: only `healthy` or `degraded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

impl From<ComponentStatus> for OverallStatus {
    fn from(status: ComponentStatus) -> Self {
        match status {
            ComponentStatus::Healthy => OverallStatus::Healthy,
            ComponentStatus::Degraded | ComponentStatus::Unhealthy => OverallStatus::Degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: OverallStatus,
    pub health_score: Option<f64>,
    pub emergency_level: EmergencyLevel,
    pub active_sessions: usize,
    pub active_operations: usize,
    pub restart_in_progress: bool,
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    pub current_resources: Option<Snapshot>,
    pub health_score: Option<f64>,
    pub score_breakdown: Option<HealthScore>,
    pub health_trend: f64,
    /// Newest first
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatusResponse {
    pub health: HealthSection,
    pub emergency: EmergencyStatus,
}

async fn health(State(h): State<ControllerHandle>) -> impl IntoResponse {
    let components = h.health.health().await;
    let restart_in_progress = h.restart.in_progress();

    let status = if restart_in_progress {
        OverallStatus::Degraded
    } else {
        components.status.into()
    };

    let response = HealthResponse {
        status,
        health_score: h.state.latest_score().await.map(|s| s.value),
        emergency_level: h.emergency.level(),
        active_sessions: h.sessions.len().await,
        active_operations: h.operations.len(),
        restart_in_progress,
        components: components.components,
        timestamp: chrono::Utc::now().timestamp(),
    };

    (StatusCode::OK, Json(response))
}

async fn resources_status(State(h): State<ControllerHandle>) -> impl IntoResponse {
    let snapshot = h.state.latest_snapshot().await;
    let score = h.state.latest_score().await;
    let emergency = h.emergency.status();
    let restart = h.restart.status();

    let recommendations = recommendations(
        snapshot.as_ref(),
        score.as_ref(),
        &emergency,
        restart.recommendation.as_ref(),
        h.config.restart.low_health_score,
    );

    let response = ResourceStatusResponse {
        health: HealthSection {
            current_resources: snapshot,
            health_score: score.map(|s| s.value),
            score_breakdown: score,
            health_trend: h.state.health_trend().await,
            alerts: h.state.recent_alerts(STATUS_ALERT_LIMIT).await,
            recommendations,
        },
        emergency,
    };

    (StatusCode::OK, Json(response))
}

async fn restart_status(State(h): State<ControllerHandle>) -> Json<RestartStatus> {
    Json(h.restart.status())
}

async fn readyz(State(h): State<ControllerHandle>) -> impl IntoResponse {
    let readiness = if h.restart.in_progress() {
        ReadinessResponse::not_ready("Restart in progress")
    } else {
        h.health.readiness().await
    };

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Operator hints derived from the current state
pub fn recommendations(
    snapshot: Option<&Snapshot>,
    score: Option<&HealthScore>,
    emergency: &EmergencyStatus,
    restart: Option<&RestartRecommendation>,
    low_health_score: f64,
) -> Vec<String> {
    let mut hints = Vec::new();

    if snapshot.is_some_and(|s| s.stale) {
        hints.push("Resource readings are stale; check process and host access".to_string());
    }

    match emergency.level {
        EmergencyLevel::Normal => {}
        EmergencyLevel::Warning => hints.push(
            "Memory above warning threshold; standard cleanup is running each tick".to_string(),
        ),
        EmergencyLevel::Critical => hints.push(
            "Memory in critical tier; emergency cleanup active, consider a restart".to_string(),
        ),
        EmergencyLevel::Emergency => hints.push(
            "Memory in emergency tier; new sessions are refused until memory recovers"
                .to_string(),
        ),
    }

    if emergency.cpu_throttling {
        hints.push("CPU throttling active; output pacing is stretched".to_string());
    }

    if let Some(score) = score.filter(|s| s.value < low_health_score) {
        hints.push(format!(
            "Health score {:.1} below {:.1}; weakest component is {}",
            score.value,
            low_health_score,
            weakest_component(score)
        ));
    }

    if let Some(restart) = restart.filter(|r| r.should_restart) {
        let when = match restart.recommended_delay_minutes {
            Some(0) | None => "now".to_string(),
            Some(minutes) => format!("within {minutes} minutes"),
        };
        hints.push(format!(
            "Restart recommended {when} ({}): {}",
            restart.severity,
            restart.reasons.join("; ")
        ));
    }

    hints
}

fn weakest_component(score: &HealthScore) -> &'static str {
    [
        ("memory", score.memory_component),
        ("cpu", score.cpu_component),
        ("sessions", score.session_component),
        ("alerts", score.alert_component),
    ]
    .into_iter()
    .min_by(|a, b| a.1.total_cmp(&b.1))
    .map(|(name, _)| name)
    .unwrap_or("memory")
}

pub fn create_router(handle: ControllerHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/resources/status", get(resources_status))
        .route("/restart/status", get(restart_status))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(handle)
}

/// Serve the status API until the listener fails
pub async fn serve(port: u16, handle: ControllerHandle) -> anyhow::Result<()> {
    let app = create_router(handle);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting status API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
