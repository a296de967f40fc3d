//! Command-line interface for training and evaluating the climate forecasting models.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use climate_forecast::data::record::{load_records, ClimateRecord, DATASET_URL};
use climate_forecast::data::split::{Partition, Split};
use climate_forecast::data::synthetic::generate_records;
use climate_forecast::experiment::{evaluate_checkpoint, ExperimentConfig, ExperimentOutcome};
use climate_forecast::persistence::SaveFormat;
use climate_forecast::report::PredictionReport;
use climate_forecast::{ForecastError, Result};

#[derive(Parser)]
#[command(name = "climate-forecast")]
#[command(about = "Jena climate forecasting with LSTM, GRU and Conv1D models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataSource {
    /// Extracted jena_climate_2009_2016.csv
    #[arg(short, long, conflicts_with = "synthetic")]
    data: Option<PathBuf>,

    /// Use this many generated 10-minute rows instead of a CSV
    #[arg(long)]
    synthetic: Option<usize>,
}

#[derive(Args)]
struct ExperimentChoice {
    /// Preset name (model1 .. model7)
    #[arg(short, long, conflicts_with = "config")]
    experiment: Option<String>,

    /// Experiment configuration JSON
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the preset experiments
    Presets,

    /// Print the model summary of an experiment
    Summary {
        #[command(flatten)]
        choice: ExperimentChoice,
    },

    /// Print an experiment configuration as JSON
    Config {
        #[command(flatten)]
        choice: ExperimentChoice,
    },

    /// Train one experiment, keeping the best epoch in a checkpoint directory
    Train {
        #[command(flatten)]
        source: DataSource,

        #[command(flatten)]
        choice: ExperimentChoice,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,

        /// Checkpoint directory (default: the experiment name)
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,

        /// Save checkpoints as JSON instead of bincode
        #[arg(long)]
        json: bool,

        /// Write the full test predictions to this CSV
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Reload a checkpoint and compare predictions with actuals
    Evaluate {
        #[command(flatten)]
        source: DataSource,

        /// Checkpoint directory written by `train`
        #[arg(long)]
        checkpoint: PathBuf,

        /// train, val or test
        #[arg(long, default_value = "test")]
        split: String,

        /// First row shown
        #[arg(long, default_value = "0")]
        start: usize,

        /// Row after the last one shown
        #[arg(long, default_value = "100")]
        end: usize,

        /// Write the full split predictions to this CSV
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Train every preset in turn
    RunAll {
        #[command(flatten)]
        source: DataSource,

        /// Parent directory for the per-model checkpoint directories
        #[arg(long, default_value = ".")]
        checkpoint_root: PathBuf,

        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,
    },
}

impl DataSource {
    fn is_synthetic(&self) -> bool {
        self.data.is_none() && self.synthetic.is_some()
    }

    fn load(&self) -> Result<Vec<ClimateRecord>> {
        match (&self.data, self.synthetic) {
            (Some(path), _) => load_records(path),
            (None, Some(rows)) => {
                info!(rows, "generating synthetic records");
                Ok(generate_records(rows, 0))
            }
            (None, None) => Err(ForecastError::Config(format!(
                "pass --data <csv> (download from {}) or --synthetic <rows>",
                DATASET_URL
            ))),
        }
    }
}

impl ExperimentChoice {
    fn resolve(&self) -> Result<ExperimentConfig> {
        match (&self.experiment, &self.config) {
            (_, Some(path)) => ExperimentConfig::load(path),
            (Some(name), None) => ExperimentConfig::preset(name),
            (None, None) => Err(ForecastError::Config(
                "pass --experiment <name> or --config <file>".to_string(),
            )),
        }
    }
}

/// Synthetic series are far shorter than the real recording, so the fixed
/// index split would leave nothing to validate on
fn adapt_split(config: &mut ExperimentConfig, source: &DataSource) {
    if source.is_synthetic() {
        config.split = Split::Fractions { train: 0.7, val: 0.15 };
    }
}

fn print_outcome(outcome: &ExperimentOutcome) {
    println!(
        "{}: {} parameters, best epoch {} saved in {}",
        outcome.name,
        outcome.num_parameters,
        outcome.best_epoch,
        outcome.checkpoint_dir.display()
    );
    let splits = [("train", outcome.train), ("val", outcome.validation), ("test", outcome.test)];
    for (split, metrics) in splits {
        if let Some(m) = metrics {
            println!("  {:<5} mse={:.6} rmse={:.6} mae={:.6}", split, m.mse, m.rmse, m.mae);
        }
    }
}

fn write_report(report: &PredictionReport, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        report.write_csv(path)?;
        info!(path = %path.display(), rows = report.len(), "wrote prediction report");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Presets => {
            for preset in ExperimentConfig::presets() {
                let parameters = preset.build_model()?.num_parameters();
                println!("{:<8} {:>7} params  {}", preset.name, parameters, preset.description);
            }
        }
        Commands::Summary { choice } => {
            let config = choice.resolve()?;
            println!("{}", config.build_model()?.summary());
        }
        Commands::Config { choice } => {
            let config = choice.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Train {
            source,
            choice,
            epochs,
            checkpoint_dir,
            json,
            report,
        } => {
            let mut config = choice.resolve()?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            adapt_split(&mut config, &source);

            let records = source.load()?;
            let dir = checkpoint_dir.unwrap_or_else(|| PathBuf::from(&config.name));
            let format = if json { SaveFormat::Json } else { SaveFormat::Binary };

            let outcome = config.run(&records, &dir, format)?;
            print_outcome(&outcome);
            print!("{}", outcome.report.window(0, 100));
            write_report(&outcome.report, report.as_deref())?;
        }
        Commands::Evaluate {
            source,
            checkpoint,
            split,
            start,
            end,
            report,
        } => {
            let partition: Partition = split.parse()?;
            let records = source.load()?;
            let (metrics, full) = evaluate_checkpoint(&records, &checkpoint, partition)?;

            println!(
                "{} mse={:.6} rmse={:.6} mae={:.6}",
                split, metrics.mse, metrics.rmse, metrics.mae
            );
            print!("{}", full.window(start, end));
            write_report(&full, report.as_deref())?;
        }
        Commands::RunAll {
            source,
            checkpoint_root,
            epochs,
        } => {
            let records = source.load()?;
            for mut config in ExperimentConfig::presets() {
                if let Some(epochs) = epochs {
                    config.training.epochs = epochs;
                }
                adapt_split(&mut config, &source);

                let dir = checkpoint_root.join(&config.name);
                let outcome = config.run(&records, &dir, SaveFormat::Binary)?;
                print_outcome(&outcome);
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "climate_forecast=info".into()))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
