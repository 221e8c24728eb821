//! Cleanup plan
//!
//! A cleanup cycle runs every registered step of the requested tier with a
//! bounded number of concurrent workers. All steps are joined before the
//! report is returned; a failing step is logged and counted but never stops
//! the others.

use crate::error::Result;
use crate::observability::{ControllerMetrics, StructuredLogger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default concurrent cleanup steps
const DEFAULT_MAX_WORKERS: usize = 4;

/// Cleanup intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupTier {
    /// Soft caches only
    Standard,
    /// Standard steps plus sessions, histories and temporary artifacts
    Emergency,
}

impl CleanupTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            CleanupTier::Standard => "standard",
            CleanupTier::Emergency => "emergency",
        }
    }

    /// Whether a step registered at `step_tier` runs in a cycle of this tier
    fn includes(self, step_tier: CleanupTier) -> bool {
        self == CleanupTier::Emergency || step_tier == CleanupTier::Standard
    }
}

impl std::fmt::Display for CleanupTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one step reclaimed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub freed_memory_mb: f64,
    pub sessions_closed: usize,
    /// Non-session items removed (files, cache entries, messages)
    pub items_removed: usize,
}

/// A unit of reclamation work
///
/// Steps must be safe to run repeatedly: a second run over unchanged state
/// reports nothing freed.
#[async_trait]
pub trait CleanupStep: Send + Sync {
    /// Stable name used in logs and failure reports
    fn name(&self) -> &str;

    fn tier(&self) -> CleanupTier;

    async fn run(&self) -> Result<StepOutcome>;
}

/// Summary of one cleanup cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub tier: CleanupTier,
    pub steps_run: usize,
    pub steps_failed: usize,
    pub freed_memory_mb: f64,
    pub sessions_closed: usize,
    pub items_removed: usize,
    pub first_failure: Option<String>,
    pub duration: Duration,
}

impl CleanupReport {
    fn empty(tier: CleanupTier) -> Self {
        Self {
            tier,
            steps_run: 0,
            steps_failed: 0,
            freed_memory_mb: 0.0,
            sessions_closed: 0,
            items_removed: 0,
            first_failure: None,
            duration: Duration::ZERO,
        }
    }

    fn record_success(&mut self, outcome: StepOutcome) {
        self.steps_run += 1;
        self.freed_memory_mb += outcome.freed_memory_mb.max(0.0);
        self.sessions_closed += outcome.sessions_closed;
        self.items_removed += outcome.items_removed;
    }

    fn record_failure(&mut self, message: String) {
        self.steps_run += 1;
        self.steps_failed += 1;
        self.first_failure.get_or_insert(message);
    }
}

/// Registered cleanup steps shared by the emergency and restart controllers
pub struct CleanupPlan {
    steps: RwLock<Vec<Arc<dyn CleanupStep>>>,
    max_workers: usize,
    /// Serializes cycles so overlapping callers never race on the same state
    cycle: Mutex<()>,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
}

impl CleanupPlan {
    pub fn new(metrics: ControllerMetrics, logger: StructuredLogger) -> Self {
        Self {
            steps: RwLock::new(Vec::new()),
            max_workers: DEFAULT_MAX_WORKERS,
            cycle: Mutex::new(()),
            metrics,
            logger,
        }
    }

    /// Set the number of concurrent workers (at least one)
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn register(&self, step: Arc<dyn CleanupStep>) {
        debug!(step = step.name(), tier = %step.tier(), "Registered cleanup step");
        self.steps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(step);
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|step| step.name().to_string())
            .collect()
    }

    /// Run every step included in `tier` and wait for all of them
    pub async fn run(&self, tier: CleanupTier) -> CleanupReport {
        let _cycle = self.cycle.lock().await;
        let start = Instant::now();

        let steps: Vec<Arc<dyn CleanupStep>> = self
            .steps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|step| tier.includes(step.tier()))
            .cloned()
            .collect();

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        for step in steps {
            let workers = workers.clone();
            tasks.spawn(async move {
                // The semaphore is never closed, so a permit is always granted
                let _permit = workers.acquire_owned().await.ok();
                let name = step.name().to_string();
                let result = step.run().await;
                (name, result)
            });
        }

        let mut report = CleanupReport::empty(tier);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record_success(outcome),
                Ok((name, Err(e))) => {
                    warn!(step = %name, error = %e, "Cleanup step failed");
                    report.record_failure(e.to_string());
                }
                Err(e) => {
                    warn!(error = %e, "Cleanup step task aborted");
                    report.record_failure(format!("cleanup step task aborted: {e}"));
                }
            }
        }
        report.duration = start.elapsed();

        self.metrics.inc_cleanup(tier.as_str());
        self.metrics.inc_cleanup_failures(report.steps_failed as u64);
        self.metrics.add_freed_memory(report.freed_memory_mb);
        self.logger.log_cleanup(
            tier.as_str(),
            report.steps_run,
            report.steps_failed,
            report.freed_memory_mb,
            report.sessions_closed,
        );

        report
    }
}

/// Host-supplied cleanup step backed by a closure
///
/// Used for soft-cache clearing, conversation history truncation and
/// allocator reclamation, which live outside this crate.
pub struct HookStep<F> {
    name: String,
    tier: CleanupTier,
    hook: F,
}

impl<F> HookStep<F>
where
    F: Fn() -> Result<StepOutcome> + Send + Sync,
{
    pub fn new(name: impl Into<String>, tier: CleanupTier, hook: F) -> Self {
        Self {
            name: name.into(),
            tier,
            hook,
        }
    }
}

#[async_trait]
impl<F> CleanupStep for HookStep<F>
where
    F: Fn() -> Result<StepOutcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> CleanupTier {
        self.tier
    }

    async fn run(&self) -> Result<StepOutcome> {
        (self.hook)()
    }
}
