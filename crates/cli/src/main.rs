//! Health controller CLI
//!
//! Queries a running controller's status API for overall health, resource
//! snapshots, alerts and graceful restart state.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, resources, restart};

/// Conversation Health Controller CLI
#[derive(Parser)]
#[command(name = "hcctl")]
#[command(author, version, about = "CLI for the Conversation Health Controller", long_about = None)]
pub struct Cli {
    /// Controller API URL (can also be set via HCCTL_API_URL env var)
    #[arg(long, env = "HCCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Print the full error chain on failure
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show overall health, component status and readiness
    Health,

    /// Show the latest resource snapshot, alerts and emergency state
    Resources {
        /// Maximum number of recent alerts to show
        #[arg(long, default_value_t = 20)]
        alerts: usize,
    },

    /// Show the restart recommendation, active operations and history
    Restart,
}

async fn run(cli: &Cli) -> Result<()> {
    let client = client::ApiClient::new(&cli.api_url)?;

    match &cli.command {
        Commands::Health => health::show_health(&client, cli.format).await,
        Commands::Resources { alerts } => {
            resources::show_resources(&client, *alerts, cli.format).await
        }
        Commands::Restart => restart::show_restart(&client, cli.format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        if cli.verbose {
            output::print_error(&format!("{e:?}"));
        } else {
            output::print_error(&e.to_string());
        }
        std::process::exit(1);
    }
}
