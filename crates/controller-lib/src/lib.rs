//! Resource and conversation health controller
//!
//! This crate provides the core functionality for:
//! - Process and host resource snapshots
//! - Composite health scoring and threshold alerts
//! - Tiered emergency response with concurrent cleanup
//! - Conversation context compression and adaptive output pacing
//! - Session lifecycle tracking and graceful restart
//! - The status API, metrics and structured logging

pub mod alerts;
pub mod api;
pub mod collector;
pub mod config;
pub mod conversation;
pub mod emergency;
pub mod error;
pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod restart;
pub mod scoring;
pub mod sessions;

pub use config::ControllerConfig;
pub use error::{ControllerError, Result};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, ReadinessResponse};
pub use models::*;
pub use monitor::{ControllerHandle, MonitorLoop, MonitorLoopBuilder, MonitorSignal};
pub use observability::{ControllerMetrics, StructuredLogger};
pub use restart::{RestartController, RestartReport, RESTART_EXIT_CODE};
