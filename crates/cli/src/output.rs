//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a rounded table, or a notice when there are no rows
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_info(empty_message);
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Print a section heading with an underline
pub fn print_heading(title: &str, width: usize) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(width));
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a megabyte figure, switching to GB past 1024
pub fn format_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{:.1} MB", mb)
    }
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format a health score, `n/a` before the first tick
pub fn format_score(score: Option<f64>) -> String {
    match score {
        Some(value) => format!("{:.1}", value),
        None => "n/a".to_string(),
    }
}

/// Color a health score: green from 80, yellow from 50, red below
pub fn color_score(score: Option<f64>) -> String {
    let formatted = format_score(score);
    match score {
        Some(value) if value >= 80.0 => formatted.green().to_string(),
        Some(value) if value >= 50.0 => formatted.yellow().to_string(),
        Some(_) => formatted.red().to_string(),
        None => formatted.dimmed().to_string(),
    }
}

/// Signed trend in points per sample
pub fn format_trend(trend: f64) -> String {
    let formatted = format!("{:+.2}", trend);
    if trend < 0.0 {
        formatted.red().to_string()
    } else {
        formatted.green().to_string()
    }
}

pub fn format_unix(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Format an RFC 3339 timestamp for display
pub fn format_timestamp(timestamp: &str) -> String {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Color status, level and severity words
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "normal" | "ready" | "info" | "low" => status.green().to_string(),
        "degraded" | "warning" | "medium" => status.yellow().to_string(),
        "critical" | "error" | "high" => status.red().to_string(),
        "unhealthy" | "emergency" | "not ready" => status.red().bold().to_string(),
        _ => status.to_string(),
    }
}

pub fn yes_no(value: bool) -> String {
    if value {
        "yes".yellow().to_string()
    } else {
        "no".to_string()
    }
}
