//! MCL SIM: a simulation driver for Monte Carlo localization.
//!
//! An agent wanders through a known maze while a particle filter tries to find it using only a
//! noisy reading of the distance to the nearest beacon. Each cycle the filter reports its
//! estimate and whether it is confident.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML)
//!   2. Specifying parameters via command-line flags
//!
//! Per-cycle records can be written to CSV for later analysis.
mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, output_for_seed, prepare_output_file, wait_for_user};
use log::{error, info};
use mcl::sim::{
    LocalizationResult, SimulationConfig, StepRecord, run_simulation, run_simulation_with,
};
use rayon::prelude::*;
use std::error::Error;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LONG_ABOUT: &str = "MCL SIM: a simulation driver for Monte Carlo localization.

An agent wanders through a known maze while a particle filter tries to find it using only a noisy
reading of the distance to the nearest beacon. Each cycle the filter weights its particles against
the reading, reports a position estimate, resamples and moves its particles the way the agent moved.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML)
  2. Specifying parameters via command-line flags

Use the 'config' subcommand to write a template configuration file.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "A simulation driver for Monte Carlo localization.", long_about = LONG_ABOUT)]
struct Cli {
    /// Run simulation from a configuration file (TOML/JSON/YAML)
    /// This option overrides any subcommand arguments
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute (ignored if --config is provided)
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run a localization simulation in the reference maze",
        long_about = "Run a localization simulation in the reference maze. The agent starts at a random free place and performs a random walk, turning whenever a wall blocks it. The particle filter is initialised uniformly over free space and refined once per cycle. Use --runs to repeat the simulation over consecutive seeds in parallel and report how often the filter became confident."
    )]
    Run(RunArgs),

    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Arguments for a simulation run
#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Number of particles
    #[arg(short = 'n', long, default_value_t = 2000)]
    particles: usize,

    /// Number of filter cycles
    #[arg(short, long, default_value_t = 100)]
    steps: usize,

    /// Random seed (the first of consecutive seeds when --runs > 1)
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Infer orientation instead of taking the agent's heading during resampling
    #[arg(long)]
    no_compass: bool,

    /// Distance the agent covers per cycle
    #[arg(long, default_value_t = 0.2)]
    speed: f64,

    /// Stop at the first confident estimate
    #[arg(long)]
    stop_when_confident: bool,

    /// Output CSV file path for per-cycle records
    /// With --runs > 1, filenames are generated as: {output_stem}_seed{seed}.csv
    #[arg(short, long, value_parser)]
    output: Option<PathBuf>,

    /// Wait for Enter between cycles ('q' stops)
    #[arg(short, long)]
    interactive: bool,

    /// Number of independent runs with consecutive seeds, executed in parallel
    #[arg(long, default_value_t = 1)]
    runs: usize,
}
impl RunArgs {
    fn to_config(&self) -> SimulationConfig {
        let mut config = SimulationConfig {
            steps: self.steps,
            seed: self.seed,
            stop_when_confident: self.stop_when_confident,
            output: self
                .output
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            ..Default::default()
        };
        config.filter.num_particles = self.particles;
        config.filter.orientation_known = !self.no_compass;
        config.agent.speed = self.speed;
        config
    }
}

/// Arguments for create-config command
#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml (recommended)
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

/// Aggregate statistics over a batch of runs.
#[derive(Debug, PartialEq)]
struct BatchSummary {
    runs: usize,
    confident_runs: usize,
    mean_first_confident_step: Option<f64>,
}
impl BatchSummary {
    fn from_results(results: &[LocalizationResult]) -> Self {
        let steps: Vec<usize> = results
            .iter()
            .filter_map(LocalizationResult::first_confident_step)
            .collect();
        let mean_first_confident_step = if steps.is_empty() {
            None
        } else {
            Some(steps.iter().sum::<usize>() as f64 / steps.len() as f64)
        };
        BatchSummary {
            runs: results.len(),
            confident_runs: steps.len(),
            mean_first_confident_step,
        }
    }
}

fn describe(record: &StepRecord) -> String {
    let estimate = if record.estimate_available {
        format!("estimate ({:.2}, {:.2})", record.mean_x, record.mean_y)
    } else {
        "no estimate".to_string()
    };
    format!(
        "step {:>4}: agent ({:.2}, {:.2}) heading {:>6.1}, {}{}, {:.1}% of particles near agent",
        record.step,
        record.agent_x,
        record.agent_y,
        mcl::wrap_to_360(record.agent_heading),
        estimate,
        if record.confident { " [confident]" } else { "" },
        record.near_fraction * 100.0
    )
}

/// Run one simulation, logging every cycle and optionally pacing on user input.
fn run_single(
    config: &SimulationConfig,
    interactive: bool,
) -> Result<LocalizationResult, Box<dyn Error>> {
    if let Some(output) = &config.output {
        prepare_output_file(Path::new(output))?;
    }
    let result = run_simulation_with(config, |record, _pf, _agent| {
        info!("{}", describe(record));
        if interactive {
            wait_for_user()
        } else {
            ControlFlow::Continue(())
        }
    })?;
    match result.first_confident_step() {
        Some(step) => info!("Filter became confident at step {step}"),
        None => info!("Filter never became confident"),
    }
    Ok(result)
}

/// Run `runs` simulations with consecutive seeds in parallel.
fn run_batch(base: &SimulationConfig, runs: usize) -> Result<BatchSummary, Box<dyn Error>> {
    if base.seed.checked_add(runs.saturating_sub(1) as u64).is_none() {
        return Err(format!(
            "seed {} leaves no room for {} consecutive seeds",
            base.seed, runs
        )
        .into());
    }
    let configs: Vec<SimulationConfig> = (0..runs as u64)
        .map(|i| {
            let seed = base.seed + i;
            SimulationConfig {
                seed,
                output: base
                    .output
                    .as_ref()
                    .map(|o| output_for_seed(Path::new(o), seed).to_string_lossy().into_owned()),
                ..base.clone()
            }
        })
        .collect();
    if let Some(output) = &base.output {
        prepare_output_file(Path::new(output))?;
    }
    info!("Running {} simulations starting at seed {}", runs, base.seed);

    let results = Mutex::new(Vec::with_capacity(runs));
    let errors = Mutex::new(Vec::new());
    configs.par_iter().for_each(|config| match run_simulation(config) {
        Ok(result) => {
            info!(
                "Seed {}: first confident step {:?}",
                config.seed,
                result.first_confident_step()
            );
            results
                .lock()
                .expect("Failed to acquire lock on results - another thread panicked")
                .push(result);
        }
        Err(e) => {
            error!("Seed {} failed: {:#}", config.seed, e);
            errors
                .lock()
                .expect("Failed to acquire lock on error collection - another thread panicked")
                .push((config.seed, e.to_string()));
        }
    });

    let errors = errors
        .into_inner()
        .expect("Failed to extract errors from mutex - another thread panicked");
    if !errors.is_empty() {
        return Err(format!("{} of {} run(s) failed", errors.len(), runs).into());
    }
    let mut results = results
        .into_inner()
        .expect("Failed to extract results from mutex - another thread panicked");
    results.sort_by_key(|r| r.seed);
    let summary = BatchSummary::from_results(&results);
    info!(
        "{} of {} runs became confident, mean first confident step: {}",
        summary.confident_runs,
        summary.runs,
        summary
            .mean_first_confident_step
            .map_or("n/a".to_string(), |s| format!("{s:.1}"))
    );
    Ok(summary)
}

fn run_cli(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    if args.runs == 0 {
        return Err("--runs must be at least 1".into());
    }
    if args.interactive && args.runs > 1 {
        return Err("--interactive cannot be combined with --runs greater than 1".into());
    }
    let config = args.to_config();
    if args.runs == 1 {
        run_single(&config, args.interactive)?;
    } else {
        run_batch(&config, args.runs)?;
    }
    Ok(())
}

fn run_from_config(config_path: &Path) -> Result<(), Box<dyn Error>> {
    info!("Loading configuration from {}", config_path.display());
    let config = SimulationConfig::from_file(config_path)?;
    info!("Configuration loaded successfully");
    info!("Particles: {}", config.filter.num_particles);
    info!("Steps: {}", config.steps);
    info!("Seed: {}", config.seed);
    info!("Output: {}", config.output.as_deref().unwrap_or("none"));
    run_single(&config, false)?;
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    prepare_output_file(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    info!("Wrote configuration template to {}", args.output.display());
    println!("\nYou can now run the simulation with:");
    println!("  mcl-sim --config {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let outcome = if let Some(ref config_path) = cli.config {
        run_from_config(config_path)
    } else {
        match cli.command {
            Some(Command::Run(args)) => run_cli(&args),
            Some(Command::CreateConfig(args)) => create_config_file(&args),
            None => {
                eprintln!("Error: No command provided. Use -h or --help for usage information.");
                std::process::exit(1);
            }
        }
    };
    if let Err(ref e) = outcome {
        error!("{e}");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_args_defaults() {
        let cli = Cli::try_parse_from(["mcl-sim", "run"]).unwrap();
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        let config = args.to_config();
        assert_eq!(config.filter.num_particles, 2000);
        assert!(config.filter.orientation_known);
        assert_eq!(config.steps, 100);
        assert_eq!(config.seed, 42);
        assert_eq!(config.agent.speed, 0.2);
        assert_eq!(config.output, None);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_run_args_overrides() {
        let cli = Cli::try_parse_from([
            "mcl-sim",
            "--log-level",
            "debug",
            "run",
            "-n",
            "500",
            "--steps",
            "20",
            "--seed",
            "9",
            "--no-compass",
            "--speed",
            "0.3",
            "--stop-when-confident",
            "-o",
            "out.csv",
        ])
        .unwrap();
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run command");
        };
        let config = args.to_config();
        assert_eq!(config.filter.num_particles, 500);
        assert!(!config.filter.orientation_known);
        assert_eq!(config.steps, 20);
        assert_eq!(config.seed, 9);
        assert_eq!(config.agent.speed, 0.3);
        assert!(config.stop_when_confident);
        assert_eq!(config.output.as_deref(), Some("out.csv"));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_config_subcommand() {
        let cli = Cli::try_parse_from(["mcl-sim", "config", "--output", "sim.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::CreateConfig(ref args)) if args.output == PathBuf::from("sim.toml")
        ));
    }

    #[test]
    fn test_create_config_file_writes_template() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("configs").join("sim.yaml");
        create_config_file(&CreateConfigArgs {
            output: output.clone(),
        })
        .unwrap();
        let config = SimulationConfig::from_file(&output).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_batch_summary() {
        let record = |step, confident| StepRecord {
            step,
            agent_x: 1.0,
            agent_y: 1.0,
            agent_heading: 0.0,
            mean_x: 1.0,
            mean_y: 1.0,
            estimate_available: true,
            confident,
            weight_sum: 1.0,
            effective_sample_size: 1.0,
            near_fraction: 1.0,
            fallback_count: 0,
        };
        let results = vec![
            LocalizationResult {
                seed: 1,
                records: vec![record(1, false), record(2, true)],
            },
            LocalizationResult {
                seed: 2,
                records: vec![record(1, false), record(2, false)],
            },
            LocalizationResult {
                seed: 3,
                records: vec![record(1, false), record(2, false), record(3, false), record(4, true)],
            },
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.runs, 3);
        assert_eq!(summary.confident_runs, 2);
        assert_eq!(summary.mean_first_confident_step, Some(3.0));
        assert_eq!(BatchSummary::from_results(&[]).mean_first_confident_step, None);
    }

    #[test]
    fn test_batch_writes_one_file_per_seed() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("batch.csv");
        let mut config = SimulationConfig {
            steps: 3,
            seed: 10,
            output: Some(output.to_string_lossy().into_owned()),
            ..Default::default()
        };
        config.filter.num_particles = 100;
        let summary = run_batch(&config, 2).unwrap();
        assert_eq!(summary.runs, 2);
        assert!(dir.path().join("batch_seed10.csv").exists());
        assert!(dir.path().join("batch_seed11.csv").exists());
    }

    #[test]
    fn test_describe_unavailable_estimate() {
        let record = StepRecord {
            step: 1,
            agent_x: 2.0,
            agent_y: 3.0,
            agent_heading: 370.0,
            mean_x: -1.0,
            mean_y: -1.0,
            estimate_available: false,
            confident: false,
            weight_sum: 0.0,
            effective_sample_size: 0.0,
            near_fraction: 0.0,
            fallback_count: 2000,
        };
        let line = describe(&record);
        assert!(line.contains("no estimate"));
        assert!(line.contains("10.0"));
    }

    #[test]
    fn test_describe_negative_estimate() {
        let record = StepRecord {
            step: 3,
            agent_x: -2.0,
            agent_y: -3.0,
            agent_heading: 45.0,
            mean_x: -2.5,
            mean_y: -3.5,
            estimate_available: true,
            confident: true,
            weight_sum: 1.0,
            effective_sample_size: 1.0,
            near_fraction: 1.0,
            fallback_count: 0,
        };
        let line = describe(&record);
        assert!(line.contains("estimate (-2.50, -3.50)"));
        assert!(!line.contains("no estimate"));
    }

    #[test]
    fn test_batch_rejects_seed_overflow() {
        let config = SimulationConfig {
            steps: 1,
            seed: u64::MAX - 1,
            ..Default::default()
        };
        assert!(run_batch(&config, 3).is_err());
    }
}
