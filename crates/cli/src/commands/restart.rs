//! `hcctl restart` - recommendation, in-flight operations and restart history

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, RestartStatus};
use crate::output::{
    color_status, format_timestamp, print_heading, print_info, print_json, print_rows,
    print_success, print_warning, yes_no, OutputFormat,
};

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Started")]
    started: String,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Forced")]
    forced: String,
    #[tabled(rename = "Drain")]
    drain: String,
    #[tabled(rename = "Remaining Ops")]
    remaining: usize,
}

pub async fn show_restart(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.restart_status().await?;

    match format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Table => {
            print_table(&status);
            Ok(())
        }
    }
}

fn print_table(status: &RestartStatus) {
    print_heading("Restart", 60);
    println!("In Progress:        {}", yes_no(status.restart_in_progress));
    println!("Active Operations:  {}", status.active_operation_count);
    println!();

    match &status.recommendation {
        Some(rec) if rec.should_restart => {
            print_warning(&format!(
                "Restart recommended ({})",
                color_status(&rec.severity)
            ));
            match rec.recommended_delay_minutes {
                Some(0) => println!("  Delay:  immediate"),
                Some(minutes) => println!("  Delay:  {} min", minutes),
                None => {}
            }
            for reason in &rec.reasons {
                println!("  • {}", reason);
            }
            println!(
                "  {}",
                format!("evaluated {}", format_timestamp(&rec.evaluated_at)).dimmed()
            );
        }
        Some(rec) => print_success(&format!(
            "No restart needed (evaluated {})",
            format_timestamp(&rec.evaluated_at)
        )),
        None => print_info("No evaluation yet"),
    }
    println!();

    println!("{}", "Active Operations".bold());
    print_rows(
        status
            .active_operations
            .iter()
            .map(|op| OperationRow {
                id: op.id,
                label: op.label.clone(),
                started: format_timestamp(&op.started_at),
            })
            .collect(),
        "No operations in flight",
    );
    println!();

    println!("{}", "History".bold());
    print_rows(
        status
            .history
            .iter()
            .rev()
            .map(|record| HistoryRow {
                time: format_timestamp(&record.timestamp),
                reason: record.reason.clone(),
                forced: if record.forced {
                    "yes".red().to_string()
                } else {
                    "no".to_string()
                },
                drain: format!("{:.1}s", record.drain_wait_ms as f64 / 1000.0),
                remaining: record.remaining_operations,
            })
            .collect(),
        "No restarts recorded",
    );
}
