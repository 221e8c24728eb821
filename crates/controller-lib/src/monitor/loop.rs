//! Monitoring loops
//!
//! Three independent loops share one [`ControllerHandle`]:
//! - health (default 30s): collect, alert, score, emergency handling, restart evaluation
//! - alert maintenance (default 60s): prune the rolling alert window
//! - session cleanup (default 300s): idle/inactive/stale eviction
//!
//! Each loop runs in its own task, exits on the shutdown broadcast or when the
//! monitoring signal is cleared, and never lets a failed tick stop it.

use super::{ControllerHandle, MonitorSignal, MonitorState};
use crate::alerts::AlertEvaluator;
use crate::collector::{ResourceProbe, SnapshotCollector};
use crate::config::ControllerConfig;
use crate::emergency::{
    CleanupPlan, EmergencyController, EmergencyOutcome, IdleSessionSweep, TempArtifactSweep,
};
use crate::error::ControllerError;
use crate::health::{components, HealthRegistry};
use crate::models::{Alert, EmergencyLevel, HealthScore, Snapshot};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::restart::{
    ActiveOperations, RestartController, RestartInputs, RestartRecommendation, RestartReport,
};
use crate::scoring::HealthScorer;
use crate::sessions::SessionRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything one health tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: Snapshot,
    /// Alerts recorded this tick (after de-duplication)
    pub alerts: Vec<Alert>,
    pub score: HealthScore,
    pub emergency: EmergencyOutcome,
    pub recommendation: RestartRecommendation,
    pub restart: Option<RestartReport>,
}

/// The orchestrator
pub struct MonitorLoop {
    handle: ControllerHandle,
    evaluator: AlertEvaluator,
    scorer: HealthScorer,
}

impl MonitorLoop {
    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    /// Run every loop until shutdown
    pub async fn run(self) {
        let this = Arc::new(self);
        let signal = this.handle.signal.clone();

        let mut loops = JoinSet::new();
        loops.spawn(this.clone().health_loop(signal.subscribe()));
        loops.spawn(this.clone().alert_loop(signal.subscribe()));
        loops.spawn(this.clone().session_loop(signal.subscribe()));

        info!(
            health_interval_secs = this.handle.config.monitor.health_interval_secs,
            alert_interval_secs = this.handle.config.monitor.alert_interval_secs,
            session_cleanup_interval_secs =
                this.handle.config.monitor.session_cleanup_interval_secs,
            "Monitoring loops started"
        );

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Monitoring loop task failed");
            }
        }
        info!("Monitoring loops stopped");
    }

    async fn health_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut next = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down health loop");
                    break;
                }
            }
            if !self.handle.signal.is_active() {
                break;
            }

            let report = self.tick().await;
            next = self.health_interval(report.emergency.cpu_throttling);
        }
    }

    async fn alert_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.handle.config.monitor.alert_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down alert maintenance loop");
                    break;
                }
            }
            if !self.handle.signal.is_active() {
                break;
            }

            let pruned = self
                .handle
                .state
                .prune_alerts(chrono::Utc::now().timestamp())
                .await;
            if pruned > 0 {
                debug!(pruned = pruned, "Pruned expired alerts");
            }
        }
    }

    async fn session_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.handle.config.monitor.session_cleanup_interval();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down session cleanup loop");
                    break;
                }
            }
            if !self.handle.signal.is_active() {
                break;
            }
            self.sweep_sessions().await;
        }
    }

    /// One pass of the session eviction rules
    pub async fn sweep_sessions(&self) {
        let stats = self.handle.sessions.cleanup().await;
        if stats.total() > 0 {
            self.handle
                .logger
                .log_sessions_evicted(stats.idle, stats.inactive, stats.stale);
        }
    }

    /// Interval until the next health tick, stretched while throttling
    fn health_interval(&self, throttled: bool) -> Duration {
        let monitor = &self.handle.config.monitor;
        let base = if throttled {
            monitor.degraded_health_interval()
        } else {
            monitor.health_interval()
        };
        base + Duration::from_millis(rand_jitter(monitor.jitter().as_millis() as u64))
    }

    /// One health tick
    ///
    /// Order: collect, alerts, score, emergency handling, restart evaluation.
    /// Stale snapshots and failed cleanup cycles are recorded as alerts.
    pub async fn tick(&self) -> TickReport {
        let start = Instant::now();
        let h = &self.handle;

        let snapshot = h.collector.collect().await;
        h.state.set_snapshot(snapshot.clone()).await;
        if snapshot.stale {
            h.health
                .set_degraded(components::COLLECTOR, "using last-known snapshot")
                .await;
        } else {
            h.health.set_healthy(components::COLLECTOR).await;
        }

        let now = chrono::Utc::now().timestamp();
        let mut raised = self.evaluator.evaluate(&snapshot);
        raised.extend(self.evaluator.stale_snapshot(&snapshot, now));
        let mut alerts = self.record_alerts(raised).await;

        let session_count = h.sessions.len().await;
        h.metrics.set_active_sessions(session_count);
        let mut score = self
            .scorer
            .score(&snapshot, session_count, h.state.recent_alert_count(now).await);

        let emergency = h.emergency.handle(&snapshot).await;
        self.report_emergency(&emergency).await;

        // A failed cleanup counts against this tick's score
        let cleanup_alert = emergency
            .cleanup
            .as_ref()
            .and_then(|report| self.evaluator.cleanup_failure(report, now));
        if let Some(alert) = cleanup_alert {
            let recorded = self.record_alerts(vec![alert]).await;
            if !recorded.is_empty() {
                score = self.scorer.score(
                    &snapshot,
                    session_count,
                    h.state.recent_alert_count(now).await,
                );
                alerts.extend(recorded);
            }
        }

        h.state.push_score(score).await;
        h.metrics.set_health_score(score.value);
        if score.value < h.config.restart.low_health_score {
            h.health
                .set_degraded(components::SCORER, format!("health score {:.1}", score.value))
                .await;
        } else {
            h.health.set_healthy(components::SCORER).await;
        }

        let recommendation = h.restart.evaluate(&RestartInputs {
            memory_mb: snapshot.memory_mb,
            uptime_hours: snapshot.uptime_hours,
            health_score: Some(score.value),
            health_trend: h.state.health_trend().await,
            session_count,
            emergency_request: emergency.restart.clone(),
        });
        if recommendation.should_restart {
            h.health
                .set_degraded(
                    components::RESTART,
                    format!(
                        "restart recommended ({}): {}",
                        recommendation.severity,
                        recommendation.reasons.join("; ")
                    ),
                )
                .await;
        } else {
            h.health.set_healthy(components::RESTART).await;
        }

        let restart = match emergency.restart.as_ref().filter(|r| r.immediate) {
            Some(request) => self.execute_restart(&request.reason, snapshot.memory_mb).await,
            None => None,
        };

        h.metrics.observe_tick_latency(start.elapsed().as_secs_f64());

        TickReport {
            snapshot,
            alerts,
            score,
            emergency,
            recommendation,
            restart,
        }
    }

    /// Record alerts in the rolling window, logging and counting the new ones
    async fn record_alerts(&self, raised: Vec<Alert>) -> Vec<Alert> {
        let h = &self.handle;
        let recorded = h.state.record_alerts(raised).await;
        for alert in &recorded {
            h.logger.log_alert(
                alert.kind,
                alert.severity,
                alert.value,
                alert.threshold,
                &alert.message,
            );
            h.metrics.inc_alert(alert.kind, alert.severity);
        }
        recorded
    }

    async fn report_emergency(&self, outcome: &EmergencyOutcome) {
        let health = &self.handle.health;
        let failed = outcome
            .cleanup
            .as_ref()
            .and_then(|report| report.first_failure.clone());

        match (outcome.level, failed) {
            (EmergencyLevel::Emergency, _) => {
                health
                    .set_unhealthy(components::EMERGENCY, "memory in emergency tier")
                    .await
            }
            (_, Some(failure)) => {
                health
                    .set_degraded(components::EMERGENCY, format!("cleanup failure: {failure}"))
                    .await
            }
            (EmergencyLevel::Critical, None) => {
                health
                    .set_degraded(components::EMERGENCY, "memory in critical tier")
                    .await
            }
            _ => health.set_healthy(components::EMERGENCY).await,
        }

        if self.handle.sessions.admission_paused() {
            health
                .set_degraded(components::SESSIONS, "session admission paused")
                .await;
        } else {
            health.set_healthy(components::SESSIONS).await;
        }
    }

    async fn execute_restart(&self, reason: &str, memory_mb: f64) -> Option<RestartReport> {
        let health = &self.handle.health;
        health.set_ready(false).await;
        health
            .set_unhealthy(components::RESTART, format!("restarting: {reason}"))
            .await;

        match self.handle.restart.execute(reason, memory_mb).await {
            Ok(report) => Some(report),
            Err(ControllerError::RestartInProgress) => {
                debug!("Restart already in progress");
                None
            }
            Err(e) => {
                warn!(error = %e, "Restart failed");
                None
            }
        }
    }
}

/// Random jitter in `[0, max_ms)`
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

/// Builds every component from configuration and wires them together
pub struct MonitorLoopBuilder {
    config: ControllerConfig,
    probe: Option<Arc<dyn ResourceProbe>>,
    metrics: Option<ControllerMetrics>,
    health: Option<HealthRegistry>,
}

impl MonitorLoopBuilder {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            probe: None,
            metrics: None,
            health: None,
        }
    }

    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health_registry(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Validate the configuration and build the loop
    ///
    /// Registers the built-in cleanup steps: idle-session closing and, when
    /// `emergency.temp_dir` is set, the temporary artifact sweep. Hosts add
    /// their own steps through `handle().cleanup_plan`.
    pub fn build(self) -> Result<(MonitorLoop, mpsc::Receiver<RestartReport>)> {
        self.config.validate()?;
        let probe = self
            .probe
            .ok_or_else(|| anyhow::anyhow!("Resource probe is required"))?;

        let config = Arc::new(self.config);
        let metrics = self.metrics.unwrap_or_default();
        let health = self.health.unwrap_or_default();
        let logger = StructuredLogger::new(config.instance_name.clone());
        let signal = MonitorSignal::new();

        let collector = Arc::new(SnapshotCollector::new(probe, metrics.clone()));
        let sessions = Arc::new(SessionRegistry::new(
            config.sessions.clone(),
            metrics.clone(),
        ));
        let operations = Arc::new(ActiveOperations::new(metrics.clone()));

        let cleanup_plan = Arc::new(
            CleanupPlan::new(metrics.clone(), logger.clone())
                .with_max_workers(config.emergency.max_cleanup_workers),
        );
        cleanup_plan.register(Arc::new(IdleSessionSweep::new(
            sessions.clone(),
            config.emergency.idle_session_close_after(),
        )));
        if let Some(dir) = &config.emergency.temp_dir {
            cleanup_plan.register(Arc::new(TempArtifactSweep::new(
                dir.clone(),
                config.emergency.temp_max_age(),
            )));
        }

        let emergency = Arc::new(EmergencyController::new(
            config.emergency.clone(),
            cleanup_plan.clone(),
            sessions.clone(),
            metrics.clone(),
            logger.clone(),
        ));
        let (restart, restart_rx) = RestartController::new(
            &config,
            operations.clone(),
            cleanup_plan.clone(),
            sessions.clone(),
            signal.clone(),
            metrics.clone(),
            logger.clone(),
        );

        let monitor = MonitorLoop {
            evaluator: AlertEvaluator::new(config.alerts.clone()),
            scorer: HealthScorer::new(&config.limits, config.sessions.max_sessions),
            handle: ControllerHandle {
                state: Arc::new(MonitorState::new(&config)),
                config,
                collector,
                sessions,
                operations,
                cleanup_plan,
                emergency,
                restart: Arc::new(restart),
                signal,
                health,
                metrics,
                logger,
            },
        };

        Ok((monitor, restart_rx))
    }
}
