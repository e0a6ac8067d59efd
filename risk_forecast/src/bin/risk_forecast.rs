//! Command-line entry point
//!
//! - `train`: validate the panel, train every horizon and publish a run
//! - `validate`: run the dataset checks only and print the report
//! - `init-config`: write a configuration file holding every default

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use risk_forecast::{DataLoader, Pipeline, PipelineConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "risk-forecast")]
#[command(about = "Multi-horizon regional risk forecasting", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train calibrated models and publish forecasts
    Train {
        /// Panel data (CSV or Parquet)
        #[arg(short, long)]
        data: PathBuf,

        /// TOML configuration; defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output root receiving runs/ and manifest.json
        #[arg(short, long, default_value = "output")]
        out: PathBuf,
    },
    /// Validate a panel without training
    Validate {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write the default configuration
    InitConfig {
        #[arg(short, long, default_value = "pipeline.toml")]
        out: PathBuf,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn train(data: &Path, config: Option<&Path>, out: &Path) -> Result<()> {
    let pipeline = Pipeline::new(load_config(config)?)?;
    let table = DataLoader::from_path(data)
        .with_context(|| format!("Failed to read {}", data.display()))?;

    std::fs::create_dir_all(out)?;
    let manifest = pipeline.run_and_publish(&table, out)?;

    println!("Run {} published to {}", manifest.run_id, out.display());
    for entry in &manifest.horizons {
        println!("  horizon {}: {} ({})", entry.horizon, entry.version, entry.family);
    }
    for (horizon, reason) in &manifest.failed_horizons {
        println!("  horizon {} skipped: {}", horizon, reason);
    }
    println!("  forecasts: {}", manifest.forecasts);
    println!("  warnings: {}", manifest.warning_count);
    Ok(())
}

fn validate(data: &Path, config: Option<&Path>) -> Result<()> {
    let pipeline = Pipeline::new(load_config(config)?)?;
    let table = DataLoader::from_path(data)
        .with_context(|| format!("Failed to read {}", data.display()))?;

    let validated = pipeline.validate(&table)?;
    println!("{}", serde_json::to_string_pretty(&validated.report)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Train { data, config, out } => train(&data, config.as_deref(), &out),
        Commands::Validate { data, config } => validate(&data, config.as_deref()),
        Commands::InitConfig { out } => {
            PipelineConfig::default().save(&out)?;
            info!("Wrote default configuration to {}", out.display());
            Ok(())
        }
    }
}
