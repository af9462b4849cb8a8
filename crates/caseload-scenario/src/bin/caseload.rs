use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use caseload_scenario::{run_pipeline, InputBundle, OutputWriter, PipelineConfig};

/// Forecast non-COVID hospital workload under capacity-triggered policies
#[derive(Parser, Debug)]
#[command(name = "caseload")]
#[command(about = "Calibrate, project and simulate hospital workload scenarios", long_about = None)]
struct Cli {
    /// JSON input bundle with census, category and equipment-usage tables
    #[arg(long)]
    inputs: PathBuf,
    /// JSON pipeline configuration; defaults are used for missing fields
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory the CSV and JSON tables are written to
    #[arg(long)]
    out: PathBuf,
    /// Seed for the epidemic projector and residual draws
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let bundle = InputBundle::from_json_file(&cli.inputs)
        .with_context(|| format!("failed to load input bundle {}", cli.inputs.display()))?;
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    info!(region = %bundle.region, scenarios = config.scenarios.len(), "starting pipeline");
    let output = run_pipeline(&bundle, &config).context("pipeline run failed")?;

    let writer = OutputWriter::new(&cli.out)
        .with_context(|| format!("failed to create output directory {}", cli.out.display()))?;
    let written = writer.write(&output).context("failed to write outputs")?;
    for path in &written {
        info!(path = %path.display(), "wrote");
    }
    Ok(())
}
