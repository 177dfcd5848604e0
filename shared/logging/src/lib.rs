use std::{fs::OpenOptions, path::PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Clone, Debug, Copy, ValueEnum, PartialEq)]
pub enum LogOutput {
    Console,
    Json,
}

/// Installs the global `tracing` subscriber.
///
/// Stdout output is filtered by `RUST_LOG` (defaulting to `level`). When
/// `write_logs_file` is set, a second ANSI-free layer appends to that file,
/// filtered by `WRITE_RUST_LOG` if present.
pub fn init_logging(
    output: LogOutput,
    level: Level,
    write_logs_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let output_logs_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?;

    let make_detailed_logs_filter = || {
        if std::env::var("WRITE_RUST_LOG").is_ok() {
            EnvFilter::builder()
                .with_env_var("WRITE_RUST_LOG")
                .from_env()
        } else {
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env()
        }
    };

    let output_layer = match output {
        LogOutput::Console => fmt::layer()
            .with_writer(std::io::stdout)
            .with_filter(output_logs_filter)
            .boxed(),
        LogOutput::Json => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .flatten_event(true)
            .with_current_span(true)
            .with_filter(output_logs_filter)
            .boxed(),
    };

    let file_layer = match write_logs_file {
        Some(path) => {
            let log_file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {path:?}"))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(log_file)
                    .with_filter(make_detailed_logs_filter()?),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(output_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
