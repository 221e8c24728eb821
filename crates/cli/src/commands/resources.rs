//! `hcctl resources` - latest snapshot, score breakdown, alerts and emergency state

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{Alert, ApiClient, ResourceStatus};
use crate::output::{
    color_score, color_status, format_mb, format_percent, format_trend, format_unix,
    print_heading, print_info, print_json, print_rows, print_warning, yes_no, OutputFormat,
};

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            time: format_unix(alert.timestamp),
            severity: color_status(&alert.severity),
            kind: alert.kind.clone(),
            message: alert.message.clone(),
        }
    }
}

/// Show resource status
///
/// `alert_limit` caps the alert table; the newest alerts are kept.
pub async fn show_resources(
    client: &ApiClient,
    alert_limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let mut status = client.resources().await?;
    truncate_alerts(&mut status, alert_limit);

    match format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Table => {
            print_table(&status);
            Ok(())
        }
    }
}

fn truncate_alerts(status: &mut ResourceStatus, limit: usize) {
    let alerts = &mut status.health.alerts;
    if alerts.len() > limit {
        alerts.drain(..alerts.len() - limit);
    }
}

fn print_table(status: &ResourceStatus) {
    let health = &status.health;

    print_heading("Resources", 60);
    match &health.current_resources {
        Some(snapshot) => {
            println!("Memory:        {}", format_mb(snapshot.memory_mb));
            println!("CPU:           {}", format_percent(snapshot.cpu_percent));
            println!("Disk:          {}", format_percent(snapshot.disk_usage_percent));
            println!("Threads:       {}", snapshot.active_threads);
            println!("Open Files:    {}", snapshot.open_files);
            println!("Uptime:        {:.1} h", snapshot.uptime_hours);
            println!(
                "Net I/O:       {} in / {} out",
                snapshot.net_io_bytes.bytes_in, snapshot.net_io_bytes.bytes_out
            );
            println!("Sampled:       {}", format_unix(snapshot.timestamp));
            if snapshot.stale {
                print_warning("Snapshot is stale: the last probe failed");
            }
        }
        None => print_info("No snapshot collected yet"),
    }
    println!();

    println!("{}", "Health".bold());
    println!("{}", "-".repeat(60));
    println!("Score:         {}", color_score(health.health_score));
    println!("Trend:         {}", format_trend(health.health_trend));
    if let Some(breakdown) = &health.score_breakdown {
        println!(
            "Components:    memory {:.0} / cpu {:.0} / sessions {:.0} / alerts {:.0}",
            breakdown.memory_component,
            breakdown.cpu_component,
            breakdown.session_component,
            breakdown.alert_component
        );
    }
    println!();

    let emergency = &status.emergency;
    println!("{}", "Emergency".bold());
    println!("{}", "-".repeat(60));
    println!("Level:               {}", color_status(&emergency.level));
    println!("Emergency Mode:      {}", yes_no(emergency.emergency_mode));
    println!("CPU Throttling:      {}", yes_no(emergency.cpu_throttling));
    println!("Standard Cleanups:   {}", emergency.standard_cleanups);
    println!("Emergency Cleanups:  {}", emergency.emergency_cleanups);
    println!("Memory Freed:        {}", format_mb(emergency.freed_memory_mb));
    println!();

    println!("{}", "Recent Alerts".bold());
    print_rows(
        health.alerts.iter().map(AlertRow::from).collect(),
        "No recent alerts",
    );

    if !health.recommendations.is_empty() {
        println!();
        println!("{}", "Recommendations".bold());
        for recommendation in &health.recommendations {
            println!("  • {}", recommendation);
        }
    }
}
