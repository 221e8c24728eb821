//! Restart marker persistence

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::debug;

/// State recorded just before a restart
///
/// Left in place for the startup diagnostics run by the supervisor; the
/// controller itself never consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartMarker {
    /// Unix seconds
    pub timestamp: i64,
    pub reason: String,
    #[serde(rename = "pre_restart_memory")]
    pub pre_restart_memory_mb: f64,
    #[serde(rename = "pre_restart_sessions")]
    pub pre_restart_session_count: usize,
}

impl RestartMarker {
    pub fn new(reason: impl Into<String>, memory_mb: f64, session_count: usize) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            reason: reason.into(),
            pre_restart_memory_mb: memory_mb,
            pre_restart_session_count: session_count,
        }
    }

    /// Write the marker so readers see either the old file or the complete new one
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::from)?;

        let temp_path = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;
        debug!(path = %path.display(), "Restart marker written");
        Ok(())
    }

    /// Read a marker if one exists
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let marker = serde_json::from_slice(&data).map_err(std::io::Error::from)?;
        Ok(Some(marker))
    }
}
