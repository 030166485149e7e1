//! Tally Ingest - CLI trigger for one ingestion run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tally_common::logging::{init_logging, LogConfig, LogLevel};
use tally_common::types::RunStatus;
use tally_ingest::{config::IngestConfig, endpoints, orchestrator::IngestionOrchestrator};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tally-ingest")]
#[command(author, version, about = "Accounting API ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every endpoint and write NDJSON objects
    Run {
        /// Restrict the run to these endpoints (repeatable)
        #[arg(short, long = "endpoint", value_name = "NAME")]
        endpoints: Vec<String>,
    },

    /// Print the endpoint catalogue as JSON
    Endpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tally-ingest")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;

    let config = IngestConfig::load().context("Invalid configuration")?;
    let catalogue = config.endpoints().context("Invalid endpoint catalogue")?;

    match cli.command {
        Command::Endpoints => {
            println!("{}", serde_json::to_string_pretty(&catalogue)?);
        },
        Command::Run { endpoints: names } => {
            let selected = endpoints::select(&catalogue, &names)?;
            info!(
                tenant = %config.tenant,
                bucket = %config.bucket,
                endpoints = selected.len(),
                "Starting ingestion"
            );

            let orchestrator = IngestionOrchestrator::from_config(&config).await?;
            let report = orchestrator.run(&selected).await;

            println!("{}", serde_json::to_string_pretty(&report)?);

            if report.status() == RunStatus::Failed {
                error!(run_id = %report.run_id, "Every endpoint failed");
                std::process::exit(1);
            }
            info!("Ingestion complete");
        },
    }

    Ok(())
}
