//! Adaptive output pacing
//!
//! Interval = `base(content type) * size * network * load`, each factor held
//! to [0.5, 1.5] and the result to [0.5, 5.0] seconds. Under nominal load most
//! content lands in the 2-3 second band.

use crate::error::{ControllerError, Result};
use crate::models::Snapshot;
use crate::observability::ControllerMetrics;
use serde::{Deserialize, Serialize};

const MIN_FACTOR: f64 = 0.5;
const MAX_FACTOR: f64 = 1.5;
const MIN_INTERVAL_SECS: f64 = 0.5;
const MAX_INTERVAL_SECS: f64 = 5.0;

/// Content longer than this (in chars) is long text
const LONG_TEXT_CHARS: usize = 1000;

const ERROR_MARKERS: &[&str] = &[
    "error:",
    "[error]",
    "exception",
    "traceback",
    "failed to",
    "fatal:",
];

const TASK_MARKERS: &[&str] = &[
    "task:",
    "todo",
    "- [ ]",
    "- [x]",
    "deploy",
    "pull request",
    "merge request",
    "milestone",
    "sprint",
];

/// Outbound content category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    ErrorMessage,
    DevelopmentTask,
    CodeSnippet,
    TextLong,
    TextShort,
}

impl ContentType {
    pub const fn base_interval_secs(self) -> f64 {
        match self {
            ContentType::ErrorMessage => 1.5,
            ContentType::TextShort => 2.0,
            ContentType::TextLong => 2.75,
            ContentType::DevelopmentTask => 2.5,
            ContentType::CodeSnippet => 2.5,
        }
    }

    /// Infer the category from content
    pub fn classify(content: &str) -> Self {
        let lower = content.to_lowercase();

        if lower.starts_with("error") || ERROR_MARKERS.iter().any(|m| lower.contains(m)) {
            ContentType::ErrorMessage
        } else if TASK_MARKERS.iter().any(|m| lower.contains(m)) {
            ContentType::DevelopmentTask
        } else if content.contains("```") || has_import_line(content) {
            ContentType::CodeSnippet
        } else if content.chars().count() > LONG_TEXT_CHARS {
            ContentType::TextLong
        } else {
            ContentType::TextShort
        }
    }
}

/// Lines such as `import x`, `from x import y`, `use a::b;` or `#include <x>`
fn has_import_line(content: &str) -> bool {
    content.lines().map(str::trim_start).any(|line| {
        line.starts_with("import ")
            || line.starts_with("#include")
            || line.starts_with("require(")
            || (line.starts_with("from ") && line.contains(" import "))
            || ((line.starts_with("use ") || line.starts_with("using ")) && line.ends_with(';'))
    })
}

/// Caller-held view of system and network state
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PacingContext {
    pub cpu_percent: f64,
    /// Memory use as a fraction of the limit, 0.0 to 1.0
    pub memory_pressure: f64,
    pub network_latency_ms: f64,
    pub recent_send_failures: u32,
    /// Output throttling requested by the emergency controller
    pub throttled: bool,
}

impl PacingContext {
    pub fn from_snapshot(snapshot: &Snapshot, memory_limit_mb: f64, throttled: bool) -> Self {
        let memory_pressure = if memory_limit_mb > 0.0 {
            (snapshot.memory_mb / memory_limit_mb).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Self {
            cpu_percent: snapshot.cpu_percent,
            memory_pressure,
            network_latency_ms: 0.0,
            recent_send_failures: 0,
            throttled,
        }
    }

    pub fn with_network(mut self, latency_ms: f64, recent_send_failures: u32) -> Self {
        self.network_latency_ms = latency_ms;
        self.recent_send_failures = recent_send_failures;
        self
    }
}

/// Recommended emission interval and the factors behind it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PacingDecision {
    pub content_type: ContentType,
    pub recommended_interval_seconds: f64,
    pub size_factor: f64,
    pub network_factor: f64,
    pub load_factor: f64,
}

/// Stateless pacer
#[derive(Debug, Clone, Default)]
pub struct StreamingPacer {
    metrics: ControllerMetrics,
}

impl StreamingPacer {
    pub fn new(metrics: ControllerMetrics) -> Self {
        Self { metrics }
    }

    pub fn pace(
        &self,
        content: &str,
        content_type: Option<ContentType>,
        context: Option<&PacingContext>,
    ) -> Result<PacingDecision> {
        if content.is_empty() {
            return Err(ControllerError::InvalidInput(
                "cannot pace empty content".to_string(),
            ));
        }

        let content_type = content_type.unwrap_or_else(|| ContentType::classify(content));
        let context = context.copied().unwrap_or_default();

        let size_factor = size_factor(content.chars().count());
        let network_factor = network_factor(&context);
        let load_factor = load_factor(&context);

        let interval =
            (content_type.base_interval_secs() * size_factor * network_factor * load_factor)
                .clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS);

        self.metrics.observe_pacing_interval(interval);

        Ok(PacingDecision {
            content_type,
            recommended_interval_seconds: interval,
            size_factor,
            network_factor,
            load_factor,
        })
    }
}

fn clamp_factor(value: f64) -> f64 {
    if value.is_nan() {
        return 1.0;
    }
    value.clamp(MIN_FACTOR, MAX_FACTOR)
}

fn size_factor(chars: usize) -> f64 {
    let factor = match chars {
        0..=99 => 0.9,
        100..=499 => 1.0,
        500..=1499 => 1.1,
        1500..=2999 => 1.25,
        _ => 1.5,
    };
    clamp_factor(factor)
}

fn network_factor(context: &PacingContext) -> f64 {
    let latency = context.network_latency_ms;
    let mut factor = if latency >= 500.0 {
        1.3
    } else if latency >= 200.0 {
        1.15
    } else if latency > 0.0 && latency < 20.0 {
        0.9
    } else {
        1.0
    };
    factor += 0.1 * context.recent_send_failures as f64;
    clamp_factor(factor)
}

fn load_factor(context: &PacingContext) -> f64 {
    if context.throttled {
        return MAX_FACTOR;
    }

    let mut factor = 1.0;
    if context.cpu_percent > 50.0 {
        factor += (context.cpu_percent - 50.0) / 100.0;
    }
    if context.memory_pressure > 0.8 {
        factor += 0.25;
    }
    clamp_factor(factor)
}
