//! Simulation configuration, runner and results for Monte Carlo localization.
//!
//! This module provides:
//! - `SimulationConfig`, the complete set of run-time parameters, readable and writable as JSON,
//!   YAML or TOML
//! - `run_simulation` and `run_simulation_with`, which drive the filter against a simulated agent
//!   walking through a maze
//! - `StepRecord` and `LocalizationResult` for storing per-cycle statistics and exporting them to
//!   CSV
use std::fs::File;
use std::io::{self, Read, Write};
use std::ops::ControlFlow;
use std::path::Path;

use anyhow::{Context, bail};
use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentConfig};
use crate::maze::{Maze, MazeConfig};
use crate::particle::{ParticleFilter, ParticleFilterConfig};

/// Everything needed to reproduce a localization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of filter cycles to run
    pub steps: usize,
    /// Seed for the single random source shared by the agent and the filter
    pub seed: u64,
    /// End the run after the first confident estimate
    pub stop_when_confident: bool,
    /// Optional CSV file receiving the per-cycle records
    pub output: Option<String>,
    pub filter: ParticleFilterConfig,
    pub agent: AgentConfig,
    pub maze: MazeConfig,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            steps: 100,
            seed: 42,
            stop_when_confident: false,
            output: None,
            filter: ParticleFilterConfig::default(),
            agent: AgentConfig::default(),
            maze: MazeConfig::default(),
        }
    }
}
impl SimulationConfig {
    /// Check every parameter and the maze layout.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.steps == 0 {
            bail!("steps must be at least 1");
        }
        self.filter.validate().context("invalid filter configuration")?;
        self.agent.validate().context("invalid agent configuration")?;
        Maze::from_config(&self.maze).context("invalid maze")?;
        Ok(())
    }
    /// Write the configuration as pretty JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        File::open(path)?.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write in the format named by the file extension (.json, .yaml/.yml or .toml).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
    /// Read in the format named by the file extension (.json, .yaml/.yml or .toml).
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported file extension: {}", path.display()),
    )
}

/// Statistics of one completed cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// One-based cycle number
    pub step: usize,
    /// True agent pose after it moved this cycle
    pub agent_x: f64,
    pub agent_y: f64,
    pub agent_heading: f64,
    /// Estimate from the pre-resample weights, `-1` when unavailable
    pub mean_x: f64,
    pub mean_y: f64,
    pub estimate_available: bool,
    pub confident: bool,
    pub weight_sum: f64,
    pub effective_sample_size: f64,
    /// Share of particles within the confidence radius of the true agent position
    pub near_fraction: f64,
    pub fallback_count: usize,
}

/// Per-cycle records of one run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalizationResult {
    pub seed: u64,
    pub records: Vec<StepRecord>,
}
impl LocalizationResult {
    pub fn new(seed: u64) -> Self {
        LocalizationResult {
            seed,
            records: Vec::new(),
        }
    }
    /// Cycle number of the first confident estimate, if any.
    pub fn first_confident_step(&self) -> Option<usize> {
        self.records.iter().find(|r| r.confident).map(|r| r.step)
    }
    pub fn final_near_fraction(&self) -> Option<f64> {
        self.records.last().map(|r| r.near_fraction)
    }
    /// Write the records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
    /// Read records previously written by [LocalizationResult::to_csv].
    pub fn from_csv<P: AsRef<Path>>(path: P, seed: u64) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        let mut result = LocalizationResult::new(seed);
        for record in reader.deserialize() {
            let record: StepRecord =
                record.with_context(|| format!("malformed record in {}", path.display()))?;
            result.records.push(record);
        }
        Ok(result)
    }
}

/// Run a full localization simulation.
pub fn run_simulation(config: &SimulationConfig) -> anyhow::Result<LocalizationResult> {
    run_simulation_with(config, |_, _, _| ControlFlow::Continue(()))
}

/// Run a localization simulation, handing every cycle's record to `hook`.
///
/// The hook may pace the run (it is called between cycles) and stops it by returning
/// `ControlFlow::Break`. Records are written to `config.output` when set.
pub fn run_simulation_with<F>(
    config: &SimulationConfig,
    mut hook: F,
) -> anyhow::Result<LocalizationResult>
where
    F: FnMut(&StepRecord, &ParticleFilter, &Agent) -> ControlFlow<()>,
{
    config.validate()?;
    let maze = Maze::from_config(&config.maze)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut agent = Agent::new(&maze, &mut rng, &config.agent);
    let mut pf = ParticleFilter::new(config.filter.clone(), &maze, &mut rng);
    info!(
        "Starting localization: {} particles, {} steps, seed {}, agent at {}",
        pf.len(),
        config.steps,
        config.seed,
        agent.pose()
    );
    let mut result = LocalizationResult::new(config.seed);
    for step in 1..=config.steps {
        let report = pf.step(&maze, &mut rng, &mut agent);
        let pose = *agent.pose();
        let record = StepRecord {
            step,
            agent_x: pose.x,
            agent_y: pose.y,
            agent_heading: pose.heading,
            mean_x: report.estimate.x,
            mean_y: report.estimate.y,
            estimate_available: report.estimate.is_available(),
            confident: report.estimate.confident,
            weight_sum: report.weight_sum,
            effective_sample_size: report.effective_sample_size,
            near_fraction: pf.fraction_near(
                &maze,
                pose.x,
                pose.y,
                config.filter.confidence_radius,
            ),
            fallback_count: report.fallback_count,
        };
        debug!("{record:?}");
        if record.confident && result.first_confident_step().is_none() {
            info!(
                "Confident estimate ({:.3}, {:.3}) at step {step}, agent at ({:.3}, {:.3})",
                record.mean_x, record.mean_y, record.agent_x, record.agent_y
            );
        }
        let flow = hook(&record, &pf, &agent);
        let confident = record.confident;
        result.records.push(record);
        if flow.is_break() {
            info!("Simulation stopped by caller after step {step}");
            break;
        }
        if confident && config.stop_when_confident {
            break;
        }
    }
    info!(
        "Finished after {} steps, first confident step: {:?}, final near fraction: {:.3}",
        result.records.len(),
        result.first_confident_step(),
        result.final_near_fraction().unwrap_or(0.0)
    );
    if let Some(output) = &config.output {
        result.to_csv(output)?;
        info!("Wrote {} records to {output}", result.records.len());
    }
    Ok(result)
}
