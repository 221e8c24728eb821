//! `hcctl health` - overall status, components and readiness

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, HealthStatus, Readiness};
use crate::output::{
    color_score, color_status, format_unix, print_heading, print_json, print_rows, print_warning,
    yes_no, OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked")]
    checked: String,
}

#[derive(Serialize)]
struct HealthView {
    health: HealthStatus,
    readiness: Readiness,
}

/// Show overall health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health = client.health().await?;
    let readiness = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&HealthView { health, readiness }),
        OutputFormat::Table => {
            print_table(&health, &readiness);
            Ok(())
        }
    }
}

fn print_table(health: &HealthStatus, readiness: &Readiness) {
    print_heading("Controller Health", 50);
    println!("Status:             {}", color_status(&health.status));
    println!("Health Score:       {}", color_score(health.health_score));
    println!("Emergency Level:    {}", color_status(&health.emergency_level));
    println!("Active Sessions:    {}", health.active_sessions);
    println!("Active Operations:  {}", health.active_operations);
    println!("Restarting:         {}", yes_no(health.restart_in_progress));
    println!("As Of:              {}", format_unix(health.timestamp));
    println!();

    if readiness.ready {
        println!("Readiness:          {}", color_status("ready"));
    } else {
        println!("Readiness:          {}", color_status("not ready"));
        if let Some(reason) = &readiness.reason {
            println!("                    {}", reason.dimmed());
        }
    }
    println!();

    let mut rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_default(),
            checked: format_unix(component.last_check_timestamp),
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    print_rows(rows, "No components registered");

    if health.status != "healthy" {
        println!();
        print_warning("Run `hcctl resources` for alerts and recommendations");
    }
}
