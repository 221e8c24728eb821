//! Health controller - keeps a conversational service stable under pressure
//!
//! Runs the monitoring loops and the status API. When a graceful restart is
//! executed the process exits with the restart exit code so the supervisor
//! respawns it.

use anyhow::Result;
use controller_lib::{
    api, collector,
    health::HealthRegistry,
    observability::ControllerMetrics,
    MonitorLoopBuilder, RESTART_EXIT_CODE,
};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long the loops get to wind down after a restart
const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting health-controller");

    let config = config::load().inspect_err(|e| {
        error!(error = %format!("{e:#}"), "Invalid configuration, refusing to start");
    })?;
    info!(instance = %config.instance_name, api_port = config.api_port, "Controller configured");

    let health_registry = HealthRegistry::with_controller_components().await;
    let metrics = ControllerMetrics::new();
    let api_port = config.api_port;

    let (monitor, mut restarts) = MonitorLoopBuilder::new(config)
        .probe(collector::create_probe()?)
        .metrics(metrics)
        .health_registry(health_registry.clone())
        .build()?;
    let handle = monitor.handle().clone();
    handle.logger.log_startup(CONTROLLER_VERSION);

    let monitor_task = tokio::spawn(monitor.run());
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if let Err(e) = api::serve(api_port, handle).await {
                error!(error = %e, "Status API server stopped");
            }
        }
    });

    health_registry.set_ready(true).await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            handle.logger.log_shutdown("SIGINT received");
            handle.signal.shutdown();
            if tokio::time::timeout(LOOP_STOP_TIMEOUT, monitor_task).await.is_err() {
                warn!("Monitoring loops did not stop in time");
            }
            info!("Shutting down");
            Ok(())
        }
        Some(report) = restarts.recv() => {
            handle.logger.log_shutdown(&format!("restart: {}", report.record.reason));
            if tokio::time::timeout(LOOP_STOP_TIMEOUT, monitor_task).await.is_err() {
                warn!("Monitoring loops did not stop in time");
            }
            info!(
                forced = report.record.forced,
                exit_code = RESTART_EXIT_CODE,
                "Exiting for supervisor restart"
            );
            std::process::exit(RESTART_EXIT_CODE);
        }
    }
}
