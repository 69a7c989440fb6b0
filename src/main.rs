use anyhow::Context;
use clap::Parser;
use rust_dialogsum::pipelines::dialogsum::{run_pipeline, DialogSumConfig};
use rust_dialogsum::Config;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fine-tunes BART on DialogSum, writes the test summaries and saves the model.
#[derive(Parser, Debug)]
#[command(name = "dialogsum-train", version)]
struct Args {
    /// JSON configuration, defaults are used for missing fields or when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => DialogSumConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => DialogSumConfig::default(),
    };

    let output = run_pipeline(&config)?;
    info!(
        steps = output.train_output.global_step,
        loss = output.train_output.training_loss,
        summaries = output.summaries.len(),
        "pipeline completed"
    );
    for (name, value) in &output.test_metrics {
        println!("{name}: {value}");
    }
    Ok(())
}
