use super::*;
use crate::config::SessionSettings;
use crate::emergency::HookStep;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

struct Harness {
    controller: Arc<RestartController>,
    reports: mpsc::Receiver<RestartReport>,
    plan: Arc<CleanupPlan>,
    signal: MonitorSignal,
    _dir: TempDir,
}

fn harness(grace_period_mins: f64) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = ControllerConfig::default();
    config.restart.grace_period_mins = grace_period_mins;
    config.restart.marker_path = dir.path().join("restart_marker.json");

    let metrics = ControllerMetrics::new();
    let logger = StructuredLogger::new("test");
    let sessions = Arc::new(SessionRegistry::new(
        SessionSettings::default(),
        metrics.clone(),
    ));
    let plan = Arc::new(CleanupPlan::new(metrics.clone(), logger.clone()));
    let operations = Arc::new(ActiveOperations::new(metrics.clone()));
    let signal = MonitorSignal::new();

    let (controller, reports) = RestartController::new(
        &config,
        operations,
        plan.clone(),
        sessions,
        signal.clone(),
        metrics,
        logger,
    );

    Harness {
        controller: Arc::new(controller),
        reports,
        plan,
        signal,
        _dir: dir,
    }
}

#[test]
fn test_quiet_inputs_do_not_recommend_restart() {
    let h = harness(5.0);
    let recommendation = h.controller.evaluate(&RestartInputs {
        memory_mb: 250.0,
        uptime_hours: 2.0,
        health_score: Some(92.0),
        ..Default::default()
    });

    assert!(!recommendation.should_restart);
    assert_eq!(recommendation.severity, RestartSeverity::None);
    assert!(recommendation.reasons.is_empty());
    assert_eq!(recommendation.recommended_delay_minutes, None);
}

#[test]
fn test_emergency_memory_is_critical() {
    let h = harness(5.0);
    let recommendation = h.controller.evaluate(&RestartInputs {
        memory_mb: 1050.0,
        ..Default::default()
    });

    assert!(recommendation.should_restart);
    assert_eq!(recommendation.severity, RestartSeverity::Critical);
    assert_eq!(recommendation.recommended_delay_minutes, Some(0));
    assert!(recommendation.reasons[0].contains("emergency threshold"));
}

#[test]
fn test_highest_trigger_wins_and_all_reasons_kept() {
    let h = harness(5.0);
    let recommendation = h.controller.evaluate(&RestartInputs {
        memory_mb: 100.0,
        uptime_hours: 30.0,
        health_score: Some(45.0),
        health_trend: -40.0,
        session_count: 95,
        emergency_request: None,
    });

    // soft uptime (low), health (medium), sessions (medium), trend (low)
    assert_eq!(recommendation.reasons.len(), 4);
    assert_eq!(recommendation.severity, RestartSeverity::Medium);
    assert_eq!(recommendation.recommended_delay_minutes, Some(30));
}

#[test]
fn test_hard_uptime_and_critical_health_are_high() {
    let h = harness(5.0);

    let uptime = h.controller.evaluate(&RestartInputs {
        uptime_hours: 80.0,
        ..Default::default()
    });
    assert_eq!(uptime.severity, RestartSeverity::High);
    assert_eq!(uptime.reasons.len(), 1);

    let health = h.controller.evaluate(&RestartInputs {
        health_score: Some(20.0),
        ..Default::default()
    });
    assert_eq!(health.severity, RestartSeverity::High);
    assert_eq!(health.recommended_delay_minutes, Some(5));
}

#[test]
fn test_emergency_request_carries_its_severity() {
    let h = harness(5.0);
    let recommendation = h.controller.evaluate(&RestartInputs {
        emergency_request: Some(RestartRequest {
            severity: RestartSeverity::High,
            reason: "critical memory tier".to_string(),
            immediate: false,
        }),
        ..Default::default()
    });

    assert_eq!(recommendation.severity, RestartSeverity::High);
    assert_eq!(recommendation.reasons, vec!["critical memory tier".to_string()]);
    assert_eq!(h.controller.status().recommendation, Some(recommendation));
}

#[tokio::test(start_paused = true)]
async fn test_drain_waits_for_operation_then_restarts() {
    let mut h = harness(1.0);
    let cleanups = Arc::new(AtomicUsize::new(0));
    let counter = cleanups.clone();
    h.plan.register(Arc::new(HookStep::new(
        "release_caches",
        CleanupTier::Emergency,
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Default::default())
        },
    )));

    let guard = h.controller.operations().begin("stream reply").unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(guard);
    });

    let mut shutdown = h.signal.subscribe();
    let start = Instant::now();
    let report = h.controller.execute("memory emergency", 1050.0).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(30));
    assert!(elapsed < Duration::from_secs(31));
    assert!(!report.record.forced);
    assert_eq!(report.record.remaining_operations, 0);
    assert!(report.drain_timeout.is_none());
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(report.cleanup.tier, CleanupTier::Emergency);

    // Marker on disk, loops told to stop, report delivered
    let marker = RestartMarker::read(&report.record.marker_path).unwrap().unwrap();
    assert_eq!(marker.reason, "memory emergency");
    assert_eq!(marker.pre_restart_memory_mb, 1050.0);
    assert!(!h.signal.is_active());
    assert!(shutdown.recv().await.is_ok());
    assert_eq!(h.reports.recv().await.unwrap(), report);

    let status = h.controller.status();
    assert!(status.restart_in_progress);
    assert_eq!(status.history.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_forces_restart() {
    let h = harness(0.5);
    let _stuck = h.controller.operations().begin("never finishes").unwrap();

    let start = Instant::now();
    let report = h.controller.execute("uptime", 300.0).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(30));
    assert!(report.record.forced);
    assert_eq!(report.record.remaining_operations, 1);
    assert!(report
        .drain_timeout
        .unwrap()
        .contains("1 active operation"));
    assert!(report.record.marker_path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_second_restart_rejected_while_first_runs() {
    let h = harness(1.0);
    let guard = h.controller.operations().begin("long tool call").unwrap();

    let first = tokio::spawn({
        let controller = h.controller.clone();
        async move { controller.execute("health", 500.0).await }
    });
    tokio::task::yield_now().await;

    assert!(h.controller.in_progress());
    assert!(matches!(
        h.controller.execute("health again", 500.0).await,
        Err(ControllerError::RestartInProgress)
    ));
    // New work is refused once a restart has started
    assert!(h.controller.operations().begin("late").is_err());

    drop(guard);
    let report = first.await.unwrap().unwrap();
    assert!(!report.record.forced);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let h = harness(0.0);
    for i in 0..3 {
        h.controller.push_history(RestartRecord {
            timestamp: Utc::now(),
            reason: format!("restart {i}"),
            forced: false,
            drain_wait_ms: 0,
            remaining_operations: 0,
            marker_path: PathBuf::from("m.json"),
        });
    }
    assert_eq!(h.controller.status().history.len(), 3);

    for i in 3..30 {
        h.controller.push_history(RestartRecord {
            timestamp: Utc::now(),
            reason: format!("restart {i}"),
            forced: false,
            drain_wait_ms: 0,
            remaining_operations: 0,
            marker_path: PathBuf::from("m.json"),
        });
    }
    let history = h.controller.status().history;
    assert_eq!(history.len(), 20);
    assert_eq!(history[0].reason, "restart 10");
}
