//! Built-in cleanup steps

use super::cleanup::{CleanupStep, CleanupTier, StepOutcome};
use crate::error::{ControllerError, Result};
use crate::sessions::SessionRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::debug;

/// Closes sessions that have been quiet longer than a threshold
pub struct IdleSessionSweep {
    registry: Arc<SessionRegistry>,
    idle_after: Duration,
}

impl IdleSessionSweep {
    pub fn new(registry: Arc<SessionRegistry>, idle_after: Duration) -> Self {
        Self {
            registry,
            idle_after,
        }
    }
}

#[async_trait]
impl CleanupStep for IdleSessionSweep {
    fn name(&self) -> &str {
        "idle_sessions"
    }

    fn tier(&self) -> CleanupTier {
        CleanupTier::Emergency
    }

    async fn run(&self) -> Result<StepOutcome> {
        let stats = self
            .registry
            .close_idle_for(self.idle_after, Utc::now())
            .await;

        Ok(StepOutcome {
            freed_memory_mb: stats.freed_memory_mb,
            sessions_closed: stats.idle,
            items_removed: 0,
        })
    }
}

/// Deletes files older than a maximum age from a temporary directory
pub struct TempArtifactSweep {
    dir: PathBuf,
    max_age: Duration,
}

impl TempArtifactSweep {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
        }
    }

    fn failure(&self, e: impl std::fmt::Display) -> ControllerError {
        ControllerError::cleanup(self.name(), format!("{}: {e}", self.dir.display()))
    }
}

#[async_trait]
impl CleanupStep for TempArtifactSweep {
    fn name(&self) -> &str {
        "temp_artifacts"
    }

    fn tier(&self) -> CleanupTier {
        CleanupTier::Emergency
    }

    async fn run(&self) -> Result<StepOutcome> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            // Nothing to sweep yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StepOutcome::default()),
            Err(e) => return Err(self.failure(e)),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.failure(e))? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(self.failure(e)),
            }
        }

        debug!(dir = %self.dir.display(), removed = removed, "Swept temporary artifacts");
        Ok(StepOutcome {
            freed_memory_mb: 0.0,
            sessions_closed: 0,
            items_removed: removed,
        })
    }
}
