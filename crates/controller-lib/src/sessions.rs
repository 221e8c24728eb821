//! Session lifecycle tracking
//!
//! The registry owns the live session map behind one lock. It enforces the
//! capacity limit on registration (evicting the least recently active
//! sessions first) and sweeps idle, inactive and stale sessions.

use crate::config::SessionSettings;
use crate::error::{ControllerError, Result};
use crate::models::Session;
use crate::observability::ControllerMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One unit of activity reported for a session
#[derive(Debug, Clone, Copy)]
pub struct SessionActivity {
    pub at: DateTime<Utc>,
    /// Change in the session's memory estimate, may be negative
    pub memory_delta_mb: f64,
}

impl SessionActivity {
    pub fn now(memory_delta_mb: f64) -> Self {
        Self {
            at: Utc::now(),
            memory_delta_mb,
        }
    }
}

/// Result of a session sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub idle: usize,
    pub inactive: usize,
    pub stale: usize,
    pub freed_memory_mb: f64,
}

impl CleanupStats {
    pub fn total(&self) -> usize {
        self.idle + self.inactive + self.stale
    }
}

/// Reason a session is removed by a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictionRule {
    Stale,
    Inactive,
    Idle,
}

/// Registry of active conversation sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    settings: SessionSettings,
    admission_paused: AtomicBool,
    metrics: ControllerMetrics,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings, metrics: ControllerMetrics) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            admission_paused: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.settings.max_sessions
    }

    /// Register a session, or return the existing one with the same id
    pub async fn register(&self, id: &str, user_id: &str) -> Result<Session> {
        self.register_at(id, user_id, Utc::now()).await
    }

    /// Register with an explicit creation time
    pub async fn register_at(
        &self,
        id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(id) {
            return Ok(existing.clone());
        }

        let max_sessions = self.settings.max_sessions;
        if self.admission_paused.load(Ordering::SeqCst) {
            debug!(session_id = %id, "Session admission paused");
            return Err(ControllerError::CapacityExceeded { max_sessions });
        }

        if sessions.len() >= max_sessions {
            let evicted = Self::evict_oldest(&mut sessions, self.settings.eviction_batch);
            self.metrics.inc_sessions_evicted("capacity", evicted);
            info!(
                evicted = evicted,
                max_sessions = max_sessions,
                "Registry at capacity, evicted least recently active sessions"
            );

            if sessions.len() >= max_sessions {
                return Err(ControllerError::CapacityExceeded { max_sessions });
            }
        }

        let session = Session::new(id, user_id, now);
        sessions.insert(id.to_string(), session.clone());
        self.metrics.set_active_sessions(sessions.len());
        Ok(session)
    }

    /// Remove up to `batch` sessions with the oldest last activity
    fn evict_oldest(sessions: &mut HashMap<String, Session>, batch: usize) -> usize {
        let mut by_activity: Vec<(DateTime<Utc>, String)> = sessions
            .values()
            .map(|s| (s.last_activity, s.id.clone()))
            .collect();
        by_activity.sort();

        by_activity
            .into_iter()
            .take(batch)
            .filter(|(_, id)| sessions.remove(id).is_some())
            .count()
    }

    /// Record activity on a session
    pub async fn touch(&self, id: &str, activity: SessionActivity) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| ControllerError::SessionNotFound(id.to_string()))?;

        session.last_activity = activity.at;
        session.message_count += 1;
        session.estimated_memory_mb =
            (session.estimated_memory_mb + activity.memory_delta_mb).max(0.0);

        Ok(session.clone())
    }

    pub async fn close(&self, id: &str) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(id)
            .ok_or_else(|| ControllerError::SessionNotFound(id.to_string()))?;
        self.metrics.set_active_sessions(sessions.len());
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Copies of all registered sessions
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn total_memory_mb(&self) -> f64 {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| s.estimated_memory_mb)
            .sum()
    }

    /// Stop or resume accepting new sessions
    pub fn set_admission_paused(&self, paused: bool) {
        let was = self.admission_paused.swap(paused, Ordering::SeqCst);
        if was != paused {
            info!(paused = paused, "Session admission changed");
        }
    }

    pub fn admission_paused(&self) -> bool {
        self.admission_paused.load(Ordering::SeqCst)
    }

    /// Sweep sessions using the configured timeouts
    pub async fn cleanup(&self) -> CleanupStats {
        self.cleanup_at(Utc::now()).await
    }

    /// Sweep with an explicit current time
    ///
    /// Rules are checked stale, then inactive, then idle; a session is counted
    /// under the first rule it matches.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupStats {
        let mut sessions = self.sessions.write().await;
        let mut stats = CleanupStats::default();

        sessions.retain(|_, session| match self.eviction_rule(session, now) {
            Some(rule) => {
                match rule {
                    EvictionRule::Stale => stats.stale += 1,
                    EvictionRule::Inactive => stats.inactive += 1,
                    EvictionRule::Idle => stats.idle += 1,
                }
                stats.freed_memory_mb += session.estimated_memory_mb;
                false
            }
            None => true,
        });

        self.metrics.inc_sessions_evicted("stale", stats.stale);
        self.metrics.inc_sessions_evicted("inactive", stats.inactive);
        self.metrics.inc_sessions_evicted("idle", stats.idle);
        self.metrics.set_active_sessions(sessions.len());

        stats
    }

    fn eviction_rule(&self, session: &Session, now: DateTime<Utc>) -> Option<EvictionRule> {
        let inactive_for = session.inactive_for(now);

        if inactive_for > self.settings.stale_timeout() {
            Some(EvictionRule::Stale)
        } else if inactive_for > self.settings.inactive_timeout()
            && session.estimated_memory_mb > self.settings.inactive_memory_mb
        {
            Some(EvictionRule::Inactive)
        } else if inactive_for > self.settings.idle_timeout() && session.message_count == 0 {
            Some(EvictionRule::Idle)
        } else {
            None
        }
    }

    /// Close every session inactive for longer than `idle`, regardless of activity count
    pub async fn close_idle_for(&self, idle: Duration, now: DateTime<Utc>) -> CleanupStats {
        let mut sessions = self.sessions.write().await;
        let mut stats = CleanupStats::default();

        sessions.retain(|_, session| {
            if session.inactive_for(now) > idle {
                stats.idle += 1;
                stats.freed_memory_mb += session.estimated_memory_mb;
                false
            } else {
                true
            }
        });

        self.metrics.inc_sessions_evicted("emergency_idle", stats.idle);
        self.metrics.set_active_sessions(sessions.len());
        stats
    }
}
