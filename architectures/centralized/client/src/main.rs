use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ctbench_centralized_client::ReportClient;
use ctbench_core::{AuditorReport, ClientReport, RUN_TOKEN_ENV};
use ctbench_logging::LogOutput;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, Level};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Collector address, host:port
    #[clap(long, env = "CTBENCH_COLLECTOR_ADDR")]
    server_addr: String,

    #[clap(long, env = RUN_TOKEN_ENV, hide_env_values = true)]
    run_token: Option<String>,

    #[clap(long, value_enum, default_value_t = LogOutput::Console)]
    log_output: LogOutput,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one worker's client report
    SendClient {
        /// JSON file holding the report
        #[clap(long)]
        report: PathBuf,
    },
    /// Send the run's auditor report
    SendAuditor {
        #[clap(long)]
        report: PathBuf,
    },
}

fn read_report<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read report file {path:?}"))?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse report file {path:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    ctbench_logging::init_logging(args.log_output, Level::INFO, None)?;
    info!(
        "============ Report client startup at {} ============",
        OffsetDateTime::now_utc()
    );

    let mut client = ReportClient::connect(&args.server_addr, args.run_token)
        .await
        .with_context(|| format!("failed to connect to collector at {}", args.server_addr))?;

    let status = match args.command {
        Commands::SendClient { report } => {
            let report = read_report::<ClientReport>(&report)?;
            info!(
                client_id = report.client_id,
                total_phase_secs = report.total_phase_secs(),
                "Sending client report"
            );
            client.report_client(report).await?
        }
        Commands::SendAuditor { report } => {
            client
                .report_auditor(read_report::<AuditorReport>(&report)?)
                .await?
        }
    };
    if !status {
        bail!("collector did not acknowledge the report");
    }
    Ok(())
}
