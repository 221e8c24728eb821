//! Integration tests for the controller status API

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use controller_lib::{
    api::create_router,
    collector::{async_trait, ResourceProbe},
    emergency::{CleanupTier, HookStep},
    health::components,
    ControllerConfig, ControllerError, ControllerHandle, MonitorLoop, MonitorLoopBuilder,
    Snapshot,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Probe reporting a fixed CPU and an adjustable memory reading
struct FixedProbe {
    memory_mb: AtomicU64,
    offline: AtomicBool,
}

impl FixedProbe {
    fn set_memory(&self, memory_mb: f64) {
        self.memory_mb.store(memory_mb.to_bits(), Ordering::SeqCst);
    }
}

#[async_trait]
impl ResourceProbe for FixedProbe {
    async fn sample(&self) -> anyhow::Result<Snapshot> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("/proc unavailable");
        }
        Ok(Snapshot {
            memory_mb: f64::from_bits(self.memory_mb.load(Ordering::SeqCst)),
            cpu_percent: 20.0,
            uptime_hours: 3.0,
            disk_usage_percent: 40.0,
            ..Snapshot::empty()
        })
    }
}

struct TestApp {
    monitor: MonitorLoop,
    handle: ControllerHandle,
    probe: Arc<FixedProbe>,
    _dir: TempDir,
}

impl TestApp {
    fn router(&self) -> Router {
        create_router(self.handle.clone())
    }
}

async fn setup_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let mut config = ControllerConfig::default();
    config.restart.grace_period_mins = 0.0;
    config.restart.marker_path = dir.path().join("restart_marker.json");

    let probe = Arc::new(FixedProbe {
        memory_mb: AtomicU64::new(250.0_f64.to_bits()),
        offline: AtomicBool::new(false),
    });
    let health = controller_lib::HealthRegistry::with_controller_components().await;

    let (monitor, _restarts) = MonitorLoopBuilder::new(config)
        .probe(probe.clone())
        .health_registry(health)
        .build()
        .unwrap();
    let handle = monitor.handle().clone();

    TestApp {
        monitor,
        handle,
        probe,
        _dir: dir,
    }
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_before_first_tick() {
    let app = setup_test_app().await;

    let (status, health) = get_json(app.router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["health_score"].is_null());
    assert_eq!(health["emergency_level"], "normal");
    assert!(health["components"][components::COLLECTOR].is_object());
    assert!(health["components"][components::RESTART].is_object());
}

#[tokio::test]
async fn test_health_reports_score_after_tick() {
    let app = setup_test_app().await;
    app.monitor.tick().await;

    let (status, health) = get_json(app.router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    // 0.30*75 + 0.25*80 + 0.25*100 + 0.20*100
    assert_eq!(health["health_score"], 87.5);
}

#[tokio::test]
async fn test_health_stays_200_when_degraded() {
    let app = setup_test_app().await;
    app.probe.set_memory(650.0);
    app.monitor.tick().await;

    let (status, health) = get_json(app.router(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["emergency_level"], "critical");
}

#[tokio::test]
async fn test_resources_status_shape() {
    let app = setup_test_app().await;
    app.probe.set_memory(500.0);
    app.monitor.tick().await;

    let (status, body) = get_json(app.router(), "/resources/status").await;

    assert_eq!(status, StatusCode::OK);
    let health = &body["health"];
    assert_eq!(health["current_resources"]["memory_mb"], 500.0);
    assert!(health["health_score"].is_number());
    assert_eq!(health["alerts"].as_array().unwrap().len(), 1);
    assert_eq!(health["alerts"][0]["kind"], "memory");
    assert_eq!(health["alerts"][0]["severity"], "warning");
    assert!(!health["recommendations"].as_array().unwrap().is_empty());

    let emergency = &body["emergency"];
    assert_eq!(emergency["emergency_mode"], false);
    assert_eq!(emergency["cpu_throttling"], false);
    assert_eq!(emergency["standard_cleanups"], 1);
    assert_eq!(emergency["emergency_cleanups"], 0);
    assert_eq!(emergency["level"], "warning");
}

fn alert_kinds(body: &serde_json::Value) -> Vec<String> {
    body["health"]["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|alert| alert["kind"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_stale_snapshot_appears_in_resource_alerts() {
    let app = setup_test_app().await;
    app.monitor.tick().await;
    let (_, before) = get_json(app.router(), "/resources/status").await;

    app.probe.offline.store(true, Ordering::SeqCst);
    app.monitor.tick().await;
    let (status, after) = get_json(app.router(), "/resources/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["health"]["current_resources"]["stale"], true);
    assert_eq!(alert_kinds(&after), vec!["collection"]);
    assert!(
        after["health"]["health_score"].as_f64().unwrap()
            < before["health"]["health_score"].as_f64().unwrap()
    );
}

#[tokio::test]
async fn test_cleanup_failure_appears_in_resource_alerts() {
    let app = setup_test_app().await;
    app.handle.cleanup_plan.register(Arc::new(HookStep::new(
        "cache_flush",
        CleanupTier::Standard,
        || Err(ControllerError::cleanup("cache_flush", "cache locked")),
    )));
    app.probe.set_memory(450.0);

    let report = app.monitor.tick().await;
    let (status, body) = get_json(app.router(), "/resources/status").await;

    assert_eq!(status, StatusCode::OK);
    let kinds = alert_kinds(&body);
    assert!(kinds.contains(&"memory".to_string()));
    assert!(kinds.contains(&"cleanup".to_string()));
    // 0.30*55 + 0.25*80 + 0.25*100 + 0.20*(100 - 2*10)
    assert_eq!(report.score.value, 77.5);
    assert_eq!(body["health"]["health_score"], 77.5);
    assert_eq!(body["emergency"]["last_cleanup"]["steps_failed"], 1);
}

#[tokio::test]
async fn test_restart_status_lists_recommendation_and_operations() {
    let app = setup_test_app().await;
    app.probe.set_memory(850.0);
    app.monitor.tick().await;
    let _guard = app.handle.operations.begin("stream reply").unwrap();

    let (status, body) = get_json(app.router(), "/restart/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restart_in_progress"], false);
    assert_eq!(body["recommendation"]["should_restart"], true);
    assert_eq!(body["recommendation"]["severity"], "high");
    assert_eq!(body["recommendation"]["recommended_delay_minutes"], 5);
    assert_eq!(body["active_operation_count"], 1);
    assert_eq!(body["active_operations"][0]["label"], "stream reply");
    assert!(body["history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_shows_in_history_and_readiness() {
    let app = setup_test_app().await;
    app.handle.health.set_ready(true).await;

    let (status, _) = get_json(app.router(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    app.probe.set_memory(1050.0);
    let report = app.monitor.tick().await;
    assert!(report.restart.is_some());

    let (status, readiness) = get_json(app.router(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Restart in progress");

    let (_, restart) = get_json(app.router(), "/restart/status").await;
    assert_eq!(restart["restart_in_progress"], true);
    assert_eq!(restart["history"].as_array().unwrap().len(), 1);
    assert_eq!(restart["history"][0]["forced"], false);

    let (status, health) = get_json(app.router(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["restart_in_progress"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_until_ready() {
    let app = setup_test_app().await;

    let (status, readiness) = get_json(app.router(), "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;
    app.probe.set_memory(500.0);
    app.monitor.tick().await;

    let response = app
        .router()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("health_controller_health_score"));
    assert!(metrics_text.contains("health_controller_memory_mb"));
    assert!(metrics_text.contains("health_controller_alerts_raised_total"));
    assert!(metrics_text.contains("health_controller_tick_latency_seconds_bucket"));
}
