//! Process and host readings
//!
//! Reads:
//! - resident memory, CPU usage and run time of this process via `sysinfo`
//! - usage of the disk holding the working directory
//! - network byte counters summed over all interfaces
//! - thread count from `/proc/self/status` and open descriptors from `/proc/self/fd`

use super::ResourceProbe;
use crate::models::{NetIo, Snapshot};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, Networks, Pid, ProcessesToUpdate, System};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Probe backed by `sysinfo` and the proc filesystem
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Pid,
    proc_path: PathBuf,
    disk_path: PathBuf,
    cpu_count: f64,
}

impl SystemProbe {
    /// Create a probe for the current process
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("cannot resolve own pid: {e}"))?;
        let disk_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;

        Ok(Self {
            system: Mutex::new(System::new()),
            pid,
            proc_path: PathBuf::from("/proc"),
            disk_path,
            cpu_count,
        })
    }

    /// Create probe with custom proc path (for testing)
    pub fn with_proc_path(proc_path: impl Into<PathBuf>) -> Result<Self> {
        let mut probe = Self::new()?;
        probe.proc_path = proc_path.into();
        Ok(probe)
    }

    /// Report disk usage for the filesystem holding this path
    pub fn with_disk_path(mut self, disk_path: impl Into<PathBuf>) -> Self {
        self.disk_path = disk_path.into();
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    /// Parse the `Threads:` line of a proc status file
    pub fn parse_thread_count(status: &str) -> Option<u32> {
        status
            .lines()
            .find_map(|line| line.strip_prefix("Threads:"))
            .and_then(|value| value.trim().parse().ok())
    }

    async fn read_thread_count(&self) -> Result<u32> {
        let status_path = self.proc_path.join("self/status");
        let content = fs::read_to_string(&status_path)
            .await
            .with_context(|| format!("Failed to read {}", status_path.display()))?;

        Self::parse_thread_count(&content)
            .with_context(|| format!("No Threads entry in {}", status_path.display()))
    }

    async fn count_open_files(&self) -> Result<u32> {
        let fd_path = self.proc_path.join("self/fd");
        let mut entries = fs::read_dir(&fd_path)
            .await
            .with_context(|| format!("Failed to list {}", fd_path.display()))?;

        let mut count = 0u32;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Usage percent of the disk whose mount point is the longest prefix of `path`
    fn disk_usage_percent(path: &Path) -> f64 {
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| {
                let total = disk.total_space();
                if total == 0 {
                    0.0
                } else {
                    let used = total.saturating_sub(disk.available_space());
                    used as f64 / total as f64 * 100.0
                }
            })
            .unwrap_or(0.0)
    }

    fn net_io() -> NetIo {
        let networks = Networks::new_with_refreshed_list();

        networks
            .list()
            .values()
            .fold(NetIo::default(), |acc, data| NetIo {
                bytes_in: acc.bytes_in.saturating_add(data.total_received()),
                bytes_out: acc.bytes_out.saturating_add(data.total_transmitted()),
            })
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn sample(&self) -> Result<Snapshot> {
        let (memory_mb, cpu_percent, uptime_hours) = {
            let mut system = self.system.lock().await;
            system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

            let process = system
                .process(self.pid)
                .ok_or_else(|| anyhow!("process {} not visible to sysinfo", self.pid))?;

            (
                process.memory() as f64 / BYTES_PER_MB,
                (process.cpu_usage() as f64 / self.cpu_count).clamp(0.0, 100.0),
                process.run_time() as f64 / 3600.0,
            )
        };

        // Thread and descriptor counts are Linux-only; elsewhere they read as zero
        let active_threads = self.read_thread_count().await.unwrap_or_else(|e| {
            debug!(error = %e, "Thread count unavailable");
            0
        });
        let open_files = self.count_open_files().await.unwrap_or_else(|e| {
            debug!(error = %e, "Open file count unavailable");
            0
        });

        Ok(Snapshot {
            memory_mb,
            cpu_percent,
            uptime_hours,
            active_threads,
            open_files,
            disk_usage_percent: Self::disk_usage_percent(&self.disk_path),
            net_io_bytes: Self::net_io(),
            timestamp: chrono::Utc::now().timestamp(),
            stale: false,
        })
    }
}
