//! Avalanche CLI: denormalizes cost-report CSV shard collections to Parquet.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use avalanche::{Config, init_tracing, pipeline};

/// Denormalizing loader for healthcare cost-report filings.
#[derive(Debug, Parser)]
#[command(name = "avalanche", version)]
struct CliArgs {
    /// Path to the YAML config file.
    #[arg(short, long)]
    config: String,

    /// Override the input directory from the config.
    #[arg(long)]
    input_dir: Option<String>,

    /// Override the output directory from the config.
    #[arg(long)]
    output_dir: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let mut config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Failed to load config: {error}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = args.input_dir {
        config.input.dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.sink.dir = dir;
    }
    if let Err(error) = config.validate() {
        eprintln!("Invalid configuration: {error}");
        return ExitCode::FAILURE;
    }

    info!(
        input = %config.input.dir,
        output = %config.sink.dir,
        dictionary = %config.dictionary.source,
        "Starting avalanche"
    );

    match pipeline::run(config).await {
        Ok(report) => {
            info!(
                rows = report.rows_written,
                files = report.files_published,
                dropped = report.total_dropped(),
                "Artifact published"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Pipeline failed: {error}");
            ExitCode::FAILURE
        }
    }
}
