//! Threshold alerting
//!
//! This module provides:
//! - Per-metric threshold evaluation of snapshots (memory, CPU, disk)
//! - A rolling alert history with de-duplication of repeated conditions

mod evaluator;
mod history;

pub use evaluator::AlertEvaluator;
pub use history::AlertHistory;
