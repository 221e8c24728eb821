//! Resource snapshot collection
//!
//! This module reads process and host resource usage into immutable
//! [`Snapshot`] values. Reading goes through the [`ResourceProbe`] trait so the
//! monitoring loop can run against a mock probe in tests; the production
//! probe combines `sysinfo` with `/proc` reads.

mod snapshot;
mod system;


pub use snapshot::SnapshotCollector;
pub use system::SystemProbe;

use crate::models::Snapshot;
use anyhow::Result;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Trait for resource reading implementations
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Read the current resource usage
    async fn sample(&self) -> Result<Snapshot>;
}

/// Create the production probe for this process
pub fn create_probe() -> Result<Arc<dyn ResourceProbe>> {
    let probe = SystemProbe::new()?;
    tracing::info!(pid = probe.pid(), "Using system resource probe");
    Ok(Arc::new(probe))
}
