use anyhow::{Context, Result};
use clap::Parser;
use ctbench_centralized_server::{App, CollectorConfig};
use ctbench_cloud::AwsCli;
use ctbench_coordinator::RunArchive;
use ctbench_core::RUN_TOKEN_ENV;
use ctbench_logging::LogOutput;
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Parser, Debug)]
enum Commands {
    ValidateConfig,
    Run,
}

#[derive(Parser, Debug, Clone)]
struct CommonArgs {
    /// Path to the collector's TOML config
    #[clap(long, env = "CTBENCH_CONFIG")]
    config: PathBuf,

    #[clap(long, value_enum, default_value_t = LogOutput::Console)]
    log_output: LogOutput,

    /// Also write logs to this file
    #[clap(long)]
    write_log: Option<PathBuf>,

    /// Run token workers must present. Overrides the one in the config.
    #[clap(long, env = RUN_TOKEN_ENV, hide_env_values = true)]
    run_token: Option<String>,
}

async fn validate(config: &CollectorConfig) -> Result<()> {
    if tokio::fs::try_exists(&config.snapshot_path)
        .await
        .unwrap_or_default()
    {
        let archive = RunArchive::new(&config.snapshot_path);
        let history = archive.load().await.context("existing snapshot is unreadable")?;
        info!(
            "Existing snapshot {} holds {} runs and will be overwritten",
            archive.path().display(),
            history.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let common_args = args.common;

    ctbench_logging::init_logging(common_args.log_output, Level::INFO, common_args.write_log)?;

    let config = CollectorConfig::load(&common_args.config);
    match args.command {
        Commands::ValidateConfig => match config {
            Ok(config) => match validate(&config).await {
                Ok(()) => info!("Config is OK!"),
                Err(error) => error!("Error found in snapshot: {error:#}"),
            },
            Err(error) => error!("Error found in config: {error}"),
        },
        Commands::Run => {
            let config = config.context("invalid config")?;
            let auth = config.run_auth(common_args.run_token);
            let provider = Arc::new(AwsCli::new(config.fleet.region.clone()));
            info!(region = provider.region(), "Using the aws CLI");

            let app = App::new(config, provider, auth).await?;
            let cancel = app.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, stopping");
                    cancel.cancel();
                }
            });
            app.run().await?;
        }
    }

    Ok(())
}
