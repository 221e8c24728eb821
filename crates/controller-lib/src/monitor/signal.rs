//! Monitoring-active signal shared by every loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// One flag plus a shutdown broadcast
///
/// Loops check [`is_active`](Self::is_active) before each tick and also
/// select on a receiver from [`subscribe`](Self::subscribe), so clearing the
/// signal stops them within one tick.
#[derive(Debug, Clone)]
pub struct MonitorSignal {
    active: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for MonitorSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSignal {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            active: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop accepting new monitoring work without waking the loops
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Clear the signal and wake every loop so it exits
    pub fn shutdown(&self) {
        self.deactivate();
        // No receivers simply means no loop is running
        let receivers = self.shutdown_tx.send(()).unwrap_or(0);
        info!(loops = receivers, "Monitoring shutdown signalled");
    }
}
