//! SENSORFUSION: laser/radar tracking with an Unscented Kalman Filter.
//!
//! - `run` feeds a recorded measurement file through the filter and writes the estimates
//!   to CSV, reporting RMSE against ground truth and NIS consistency per sensor.
//! - `simulate` writes a synthetic measurement file with ground truth.
//! - `config` writes a template configuration file.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{ensure_parent_dir, init_logger, validate_input_path};
use log::{error, info, warn};
use serde::Serialize;
use std::cell::RefCell;
use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;

use sensorfusion::config::FilterConfig;
use sensorfusion::fusion::FusionFilter;
use sensorfusion::messages::{SensorType, read_measurement_file, write_measurement_file};
use sensorfusion::sim::{SensorNoise, TrackSimulation, run_filter, simulate_track};

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "Track a moving object by fusing laser and radar measurements with an Unscented Kalman Filter."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace); overrides the configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run the filter over a measurement file",
        long_about = "Run the filter over a measurement file. Each line holds one laser (L px py timestamp) or radar (R rho phi rho_dot timestamp) measurement, optionally followed by the ground truth px py vx vy. The estimates are written to a CSV file."
    )]
    Run(RunArgs),
    #[command(name = "simulate", about = "Generate a synthetic measurement file")]
    Simulate(SimulateArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Input measurement file
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output CSV file for the estimates
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Filter configuration file (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Optional CSV file receiving every NIS value as it is computed
    #[arg(long)]
    nis_output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Output measurement file
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Length of the simulated track in seconds
    #[arg(long, default_value_t = 25.0)]
    duration_s: f64,

    /// Time between measurements in microseconds
    #[arg(long, default_value_t = 50_000)]
    period_us: u64,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Configuration file providing the sensor noise (TOML/JSON/YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file; the format follows the extension (.toml, .json, .yaml)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// One row of the NIS CSV file
#[derive(Serialize)]
struct NisRow {
    sensor: SensorType,
    timestamp_us: u64,
    nis: f64,
    threshold_95: f64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Command::Run(args) => args.config.clone(),
        Command::Simulate(args) => args.config.clone(),
        Command::CreateConfig(_) => None,
    };
    let config = match &config_path {
        Some(path) => FilterConfig::from_file(path)?,
        None => FilterConfig::default(),
    };

    // CLI flags take precedence over the configuration file
    let log_level = cli.log_level.as_deref().unwrap_or(config.logging.level.as_str());
    let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
    init_logger(log_level, cli.log_file.as_ref().or(config_log_file.as_ref()))?;
    if let Some(path) = &config_path {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Command::Run(args) => run(&args, config),
        Command::Simulate(args) => simulate(&args, &config),
        Command::CreateConfig(args) => create_config_file(&args),
    }
}

fn run(args: &RunArgs, config: FilterConfig) -> Result<(), Box<dyn Error>> {
    validate_input_path(&args.input)?;
    let records = read_measurement_file(&args.input)?;
    info!(
        "Read {} measurements from {}",
        records.len(),
        args.input.display()
    );

    let mut filter = FusionFilter::new(config)?;
    let nis_writer = match &args.nis_output {
        Some(path) => {
            ensure_parent_dir(path)?;
            let writer = Rc::new(RefCell::new(csv::Writer::from_writer(File::create(path)?)));
            let sink = Rc::clone(&writer);
            filter.set_nis_observer(Box::new(move |sensor, timestamp_us, nis| {
                let row = NisRow {
                    sensor,
                    timestamp_us,
                    nis,
                    threshold_95: sensor.nis_threshold_95(),
                };
                if let Err(e) = sink.borrow_mut().serialize(row) {
                    error!("Failed to write NIS value: {}", e);
                }
            }));
            Some(writer)
        }
        None => None,
    };

    let name = args
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    let result = run_filter(&mut filter, &records, name);
    if let Some(writer) = nis_writer {
        writer.borrow_mut().flush()?;
    }

    ensure_parent_dir(&args.output)?;
    result.to_csv(&args.output)?;
    info!(
        "Wrote {} estimates to {}",
        result.records.len(),
        args.output.display()
    );

    match result.rmse() {
        Some(rmse) => info!("{}", rmse),
        None => info!("No ground truth in {}; RMSE not computed", args.input.display()),
    }
    for sensor in [SensorType::Laser, SensorType::Radar] {
        if let Some(summary) = result.nis_summary(sensor) {
            info!("{:?} NIS: {}", sensor, summary);
        }
    }
    if result.failed_updates > 0 {
        warn!("{} measurements could not be processed", result.failed_updates);
    }
    Ok(())
}

fn simulate(args: &SimulateArgs, config: &FilterConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;
    let sim = TrackSimulation {
        duration_s: args.duration_s,
        period_us: args.period_us,
        ..Default::default()
    };
    let records = simulate_track(&sim, &SensorNoise::from(config), args.seed)?;
    ensure_parent_dir(&args.output)?;
    write_measurement_file(&args.output, &records)?;
    info!(
        "Wrote {} simulated measurements to {}",
        records.len(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    FilterConfig::default().to_file(&args.output)?;
    info!("Wrote default configuration to {}", args.output.display());
    Ok(())
}
