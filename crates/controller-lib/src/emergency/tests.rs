//! Tests for the emergency controller and cleanup plan

#[cfg(test)]
mod controller_tests {
    use crate::config::{EmergencyThresholds, SessionSettings};
    use crate::emergency::{
        CleanupPlan, CleanupStep, CleanupTier, EmergencyController, IdleSessionSweep, StepOutcome,
    };
    use crate::error::Result;
    use crate::models::{EmergencyLevel, RestartSeverity, Snapshot};
    use crate::observability::{ControllerMetrics, StructuredLogger};
    use crate::sessions::SessionRegistry;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    fn snapshot(memory_mb: f64, cpu_percent: f64) -> Snapshot {
        Snapshot {
            memory_mb,
            cpu_percent,
            ..Snapshot::empty()
        }
    }

    fn setup() -> (Arc<EmergencyController>, Arc<CleanupPlan>, Arc<SessionRegistry>) {
        let metrics = ControllerMetrics::new();
        let logger = StructuredLogger::new("test");
        let sessions = Arc::new(SessionRegistry::new(
            SessionSettings::default(),
            metrics.clone(),
        ));
        let plan = Arc::new(CleanupPlan::new(metrics.clone(), logger.clone()));
        let controller = Arc::new(EmergencyController::new(
            EmergencyThresholds::default(),
            plan.clone(),
            sessions.clone(),
            metrics,
            logger,
        ));
        (controller, plan, sessions)
    }

    #[test]
    fn test_classification_examples() {
        let (controller, _, _) = setup();

        assert_eq!(controller.classify(350.0), EmergencyLevel::Normal);
        assert_eq!(controller.classify(400.0), EmergencyLevel::Warning);
        assert_eq!(controller.classify(650.0), EmergencyLevel::Critical);
        assert_eq!(controller.classify(999.9), EmergencyLevel::Critical);
        assert_eq!(controller.classify(1050.0), EmergencyLevel::Emergency);
    }

    #[tokio::test]
    async fn test_emergency_tier_requests_immediate_restart() {
        let (controller, _, sessions) = setup();

        let outcome = controller.handle(&snapshot(1050.0, 10.0)).await;

        assert_eq!(outcome.level, EmergencyLevel::Emergency);
        assert_eq!(outcome.previous, EmergencyLevel::Normal);
        let restart = outcome.restart.unwrap();
        assert!(restart.immediate);
        assert_eq!(restart.severity, RestartSeverity::Critical);
        assert_eq!(outcome.cleanup.unwrap().tier, CleanupTier::Emergency);
        assert!(sessions.admission_paused());

        let status = controller.status();
        assert!(status.emergency_mode);
        assert_eq!(status.emergency_cleanups, 1);
    }

    #[tokio::test]
    async fn test_critical_tier_recommends_restart_by_high_mark() {
        let (controller, _, sessions) = setup();

        let outcome = controller.handle(&snapshot(650.0, 10.0)).await;
        let restart = outcome.restart.unwrap();
        assert_eq!(restart.severity, RestartSeverity::Medium);
        assert!(!restart.immediate);
        assert!(!sessions.admission_paused());

        let outcome = controller.handle(&snapshot(850.0, 10.0)).await;
        assert_eq!(outcome.restart.unwrap().severity, RestartSeverity::High);
    }

    #[tokio::test]
    async fn test_warning_tier_runs_standard_cleanup_only() {
        let (controller, _, _) = setup();

        let outcome = controller.handle(&snapshot(450.0, 10.0)).await;

        assert_eq!(outcome.level, EmergencyLevel::Warning);
        assert_eq!(outcome.cleanup.unwrap().tier, CleanupTier::Standard);
        assert!(outcome.restart.is_none());
        assert_eq!(controller.status().standard_cleanups, 1);
        assert_eq!(controller.status().emergency_cleanups, 0);
    }

    #[tokio::test]
    async fn test_admission_resumes_below_emergency() {
        let (controller, _, sessions) = setup();

        controller.handle(&snapshot(1100.0, 10.0)).await;
        assert!(sessions.admission_paused());

        let outcome = controller.handle(&snapshot(100.0, 10.0)).await;
        assert_eq!(outcome.level, EmergencyLevel::Normal);
        assert!(!sessions.admission_paused());
        assert!(sessions.register("after", "u").await.is_ok());
    }

    #[tokio::test]
    async fn test_cpu_throttling_flag() {
        let (controller, _, _) = setup();

        let outcome = controller.handle(&snapshot(100.0, 90.0)).await;
        assert!(outcome.cpu_throttling);
        assert_eq!(outcome.level, EmergencyLevel::Normal);

        let outcome = controller.handle(&snapshot(100.0, 20.0)).await;
        assert!(!outcome.cpu_throttling);

        // Critical memory throttles regardless of CPU
        let outcome = controller.handle(&snapshot(700.0, 5.0)).await;
        assert!(outcome.cpu_throttling);
        assert!(controller.cpu_throttling());
    }

    /// Step that waits on a gate before completing
    struct GatedStep {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl CleanupStep for GatedStep {
        fn name(&self) -> &str {
            "gated"
        }

        fn tier(&self) -> CleanupTier {
            CleanupTier::Standard
        }

        async fn run(&self) -> Result<StepOutcome> {
            let _permit = self.gate.acquire().await;
            Ok(StepOutcome::default())
        }
    }

    #[tokio::test]
    async fn test_level_held_until_cleanup_completes() {
        let (controller, plan, _) = setup();
        let gate = Arc::new(Semaphore::new(0));
        plan.register(Arc::new(GatedStep { gate: gate.clone() }));

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.handle(&snapshot(650.0, 10.0)).await }
        });
        while controller.level() != EmergencyLevel::Critical {
            tokio::task::yield_now().await;
        }

        // Memory has recovered but the critical cleanup has not finished
        let second = tokio::spawn({
            let controller = controller.clone();
            async move { controller.handle(&snapshot(300.0, 10.0)).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        gate.add_permits(10);
        assert_eq!(first.await.unwrap().level, EmergencyLevel::Critical);
        assert_eq!(second.await.unwrap().level, EmergencyLevel::Critical);

        // With a completed cycle behind it the level may relax
        let third = controller.handle(&snapshot(300.0, 10.0)).await;
        assert_eq!(third.level, EmergencyLevel::Normal);
        assert!(third.cleanup.is_none());
    }

    #[tokio::test]
    async fn test_repeated_emergency_cleanup_does_not_double_count() {
        let (controller, plan, sessions) = setup();
        plan.register(Arc::new(IdleSessionSweep::new(
            sessions.clone(),
            std::time::Duration::from_secs(30 * 60),
        )));

        let now = Utc::now();
        sessions
            .register_at("old", "u", now - ChronoDuration::hours(2))
            .await
            .unwrap();
        sessions
            .touch(
                "old",
                crate::sessions::SessionActivity {
                    at: now - ChronoDuration::hours(1),
                    memory_delta_mb: 12.0,
                },
            )
            .await
            .unwrap();
        sessions.register("fresh", "u").await.unwrap();

        let first = controller.handle(&snapshot(700.0, 10.0)).await;
        let second = controller.handle(&snapshot(700.0, 10.0)).await;

        let first = first.cleanup.unwrap();
        let second = second.cleanup.unwrap();
        assert_eq!(first.sessions_closed, 1);
        assert_eq!(first.freed_memory_mb, 12.0);
        assert_eq!(second.sessions_closed, 0);
        assert_eq!(second.freed_memory_mb, 0.0);
        assert_eq!(second.steps_failed, 0);

        let status = controller.status();
        assert_eq!(status.emergency_cleanups, 2);
        assert_eq!(status.freed_memory_mb, 12.0);
        assert_eq!(sessions.len().await, 1);
    }
}

#[cfg(test)]
mod plan_tests {
    use crate::emergency::{
        CleanupPlan, CleanupStep, CleanupTier, HookStep, StepOutcome, TempArtifactSweep,
    };
    use crate::error::{ControllerError, Result};
    use crate::observability::{ControllerMetrics, StructuredLogger};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn plan(max_workers: usize) -> CleanupPlan {
        CleanupPlan::new(ControllerMetrics::new(), StructuredLogger::new("test"))
            .with_max_workers(max_workers)
    }

    fn freeing(name: &str, tier: CleanupTier, mb: f64) -> Arc<dyn CleanupStep> {
        Arc::new(HookStep::new(name, tier, move || {
            Ok(StepOutcome {
                freed_memory_mb: mb,
                ..Default::default()
            })
        }))
    }

    #[tokio::test]
    async fn test_standard_cycle_skips_emergency_steps() {
        let plan = plan(4);
        plan.register(freeing("soft_cache", CleanupTier::Standard, 5.0));
        plan.register(freeing("history_truncation", CleanupTier::Emergency, 20.0));

        let standard = plan.run(CleanupTier::Standard).await;
        assert_eq!(standard.steps_run, 1);
        assert_eq!(standard.freed_memory_mb, 5.0);

        let emergency = plan.run(CleanupTier::Emergency).await;
        assert_eq!(emergency.steps_run, 2);
        assert_eq!(emergency.freed_memory_mb, 25.0);
        assert_eq!(plan.step_names().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_stop_others() {
        let plan = plan(4);
        plan.register(freeing("soft_cache", CleanupTier::Standard, 3.0));
        plan.register(Arc::new(HookStep::new(
            "allocator_trim",
            CleanupTier::Standard,
            || Err(ControllerError::cleanup("allocator_trim", "not supported")),
        )));

        let report = plan.run(CleanupTier::Standard).await;

        assert_eq!(report.steps_run, 2);
        assert_eq!(report.steps_failed, 1);
        assert_eq!(report.freed_memory_mb, 3.0);
        assert!(report.first_failure.unwrap().contains("allocator_trim"));
    }

    #[tokio::test]
    async fn test_empty_plan_reports_nothing() {
        let report = plan(4).run(CleanupTier::Emergency).await;
        assert_eq!(report.steps_run, 0);
        assert_eq!(report.freed_memory_mb, 0.0);
        assert!(report.first_failure.is_none());
    }

    /// Step that records the peak number of concurrently running steps
    struct ConcurrencyProbe {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CleanupStep for ConcurrencyProbe {
        fn name(&self) -> &str {
            "probe"
        }

        fn tier(&self) -> CleanupTier {
            CleanupTier::Standard
        }

        async fn run(&self) -> Result<StepOutcome> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(StepOutcome::default())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_are_bounded() {
        let plan = plan(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            plan.register(Arc::new(ConcurrencyProbe {
                running: running.clone(),
                peak: peak.clone(),
            }));
        }

        let report = plan.run(CleanupTier::Standard).await;

        assert_eq!(report.steps_run, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    fn backdate(path: &std::path::Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_temp_artifact_sweep_removes_old_files() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("render-1.tmp");
        let fresh = temp_dir.path().join("render-2.tmp");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&fresh, b"fresh").unwrap();
        backdate(&old, Duration::from_secs(2 * 60 * 60));
        std::fs::create_dir(temp_dir.path().join("nested")).unwrap();

        let sweep = TempArtifactSweep::new(temp_dir.path(), Duration::from_secs(60 * 60));

        let outcome = sweep.run().await.unwrap();
        assert_eq!(outcome.items_removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(temp_dir.path().join("nested").exists());

        let again = sweep.run().await.unwrap();
        assert_eq!(again.items_removed, 0);
    }

    #[tokio::test]
    async fn test_temp_artifact_sweep_missing_dir_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let sweep = TempArtifactSweep::new(
            temp_dir.path().join("never-created"),
            Duration::from_secs(60),
        );

        assert_eq!(sweep.run().await.unwrap(), StepOutcome::default());
    }
}
