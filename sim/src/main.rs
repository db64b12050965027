//! MCL SIM: Offline replay and scoring tool for the landmark Monte Carlo localization filter.
//!
//! The tool replays recorded datasets (landmark map, controls, ground truth and per-step observations) through
//! the particle filter and reports the cumulative mean position and heading error against configurable limits.
//!
//! Filter parameters come from a configuration file (TOML/JSON/YAML) and can be overridden with command-line
//! flags. Use the `config` subcommand to write a default configuration file as a starting point.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{get_dataset_dirs, init_logger, result_path};
use log::{LevelFilter, error, info};
use mcl::config::FilterConfig;
use mcl::particle::{PoseEstimateStrategy, ResamplingStrategy};
use mcl::sim::{Dataset, LocalizationResult, run_localization};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "MCL SIM: Offline replay and scoring tool for the landmark Monte Carlo localization filter.

A dataset directory contains:
  map_data.txt                           landmark rows 'x y id'
  control_data.txt                       control rows 'velocity yaw_rate', one per timestep
  gt_data.txt                            ground truth rows 'x y theta', one per timestep
  observation/observations_000001.txt    vehicle-frame observation rows 'x y', one file per timestep

Files have no header and may be tab, comma or space delimited. The --data argument may point at a single dataset
or at a directory whose subdirectories are datasets.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay and score landmark localization datasets.", long_about = LONG_ABOUT)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: LevelFilter,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        name = "run",
        about = "Replay one or more datasets through the particle filter",
        long_about = "Replay one or more datasets through the particle filter. The filter is initialized from a noisy GPS fix at the first timestep, then predicts with the recorded controls and corrects against noisy landmark observations at every step. The cumulative mean x, y and yaw errors are checked against the configured error limits."
    )]
    Run(RunArgs),
    #[command(
        name = "config",
        about = "Write a default configuration file",
        long_about = "Write a default configuration file. The format (TOML, JSON or YAML) is chosen from the file extension."
    )]
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Dataset directory, or a directory of dataset directories
    #[arg(short, long)]
    data: PathBuf,
    /// Filter configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Output CSV file (single dataset) or directory for per-step results
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Override the random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Override the resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,
    /// Override the pose estimate strategy
    #[arg(long, value_enum)]
    estimate: Option<PoseEstimateStrategy>,
    /// Weight particles on all cores
    #[arg(long)]
    parallel: bool,
    /// Exit with an error if any dataset exceeds the error limits
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Output configuration file path (.toml, .json, .yaml or .yml)
    #[arg(short, long)]
    output: PathBuf,
}

/// Resolve the filter configuration from an optional file and the command-line overrides.
fn build_config(args: &RunArgs) -> Result<FilterConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            FilterConfig::from_file(path)?
        }
        None => FilterConfig::default(),
    };
    if let Some(n) = args.particles {
        config.num_particles = n;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(strategy) = args.resampling {
        config.resampling_strategy = strategy;
    }
    if let Some(strategy) = args.estimate {
        config.estimate_strategy = strategy;
    }
    if args.parallel {
        config.parallel = true;
    }
    config.validate()?;
    Ok(config)
}

fn process_dataset(
    dir: &Path,
    config: &FilterConfig,
    output: Option<&Path>,
    is_multiple: bool,
) -> Result<LocalizationResult, Box<dyn Error>> {
    let dataset = Dataset::from_dir(dir)?;
    let result = run_localization(&dataset, config)?;
    println!("{}: {}", dir.display(), result.summary());
    if let Some(output) = output {
        let path = result_path(output, dir, is_multiple);
        result.to_csv(&path)?;
        info!("Results written to {}", path.display());
    }
    Ok(result)
}

fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = build_config(args)?;
    let datasets = get_dataset_dirs(&args.data)?;
    let is_multiple = datasets.len() > 1;
    info!(
        "Replaying {} dataset(s) with {} particles (seed {})",
        datasets.len(),
        config.num_particles,
        config.seed
    );

    let outcomes: Vec<(PathBuf, Result<bool, String>)> = datasets
        .par_iter()
        .map(|dir| {
            let outcome = process_dataset(dir, &config, args.output.as_deref(), is_multiple)
                .map(|result| result.passed())
                .map_err(|e| e.to_string());
            (dir.clone(), outcome)
        })
        .collect();

    let mut failed = 0;
    let mut exceeded = 0;
    for (dir, outcome) in &outcomes {
        match outcome {
            Ok(true) => {}
            Ok(false) => exceeded += 1,
            Err(e) => {
                error!("Error processing {}: {}", dir.display(), e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} dataset(s) failed to process", failed).into());
    }
    if exceeded > 0 {
        let message = format!("{} dataset(s) exceeded the error limits", exceeded);
        if args.strict {
            return Err(message.into());
        }
        error!("{}", message);
    }
    Ok(())
}

fn write_default_config(args: &ConfigArgs) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    FilterConfig::default().to_file(&args.output)?;
    info!("Default configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(cli.log_level, cli.log_file.as_deref())?;

    match &cli.command {
        Command::Run(args) => run(args),
        Command::Config(args) => write_default_config(args),
    }
}
