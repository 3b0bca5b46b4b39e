//! Particle filter for Monte Carlo localization.
//!
//! The filter owns a fixed-size population of [Pose] hypotheses and refines it once per cycle:
//!
//! 1. every particle is weighted against the agent's latest reading ([ParticleFilter::assign_weights]),
//! 2. a confidence estimate is taken from those pre-resample weights ([compute_mean_point]),
//! 3. the weights are normalized and the population is redrawn in proportion to them
//!    ([WeightedDistribution], [resample]),
//! 4. every new particle is turned and advanced exactly like the agent ([ParticleFilter::apply_motion]).
//!
//! None of these phases can fail. Degenerate populations (every weight zero) are handled by
//! repopulating from random free places, and a degenerate centroid yields
//! [MeanEstimate::UNAVAILABLE].
use std::fmt::{self, Debug};

use anyhow::bail;
use log::{debug, warn};
use nalgebra::Vector2;
use rand::Rng;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::measurements::{BeaconDistanceModel, DEFAULT_SENSOR_SIGMA};
use crate::noise::{
    DEFAULT_HEADING_JITTER_DEG, DEFAULT_LITTLE_NOISE, DEFAULT_SOME_NOISE, NoiseModel,
};
use crate::{Environment, Pose, heading_delta};

/// Run-time parameters of the particle filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleFilterConfig {
    /// Population cardinality, fixed for the lifetime of the filter
    pub num_particles: usize,
    /// When true, reborn particles take the agent's heading instead of their parent's
    pub orientation_known: bool,
    pub little_noise: f64,
    pub some_noise: f64,
    pub heading_jitter_deg: f64,
    pub sensor_sigma: f64,
    pub confidence_radius: f64,
    /// Share of the population that must sit within `confidence_radius` of the centroid
    pub confidence_fraction: f64,
}
impl Default for ParticleFilterConfig {
    fn default() -> Self {
        ParticleFilterConfig {
            num_particles: 2000,
            orientation_known: true,
            little_noise: DEFAULT_LITTLE_NOISE,
            some_noise: DEFAULT_SOME_NOISE,
            heading_jitter_deg: DEFAULT_HEADING_JITTER_DEG,
            sensor_sigma: DEFAULT_SENSOR_SIGMA,
            confidence_radius: 1.0,
            confidence_fraction: 0.95,
        }
    }
}
impl ParticleFilterConfig {
    pub fn noise_model(&self) -> NoiseModel {
        NoiseModel::new(self.little_noise, self.some_noise, self.heading_jitter_deg)
    }
    pub fn sensor_model(&self) -> BeaconDistanceModel {
        BeaconDistanceModel::new(self.sensor_sigma)
    }
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_particles == 0 {
            bail!("num_particles must be at least 1");
        }
        for (name, level) in [
            ("little_noise", self.little_noise),
            ("some_noise", self.some_noise),
            ("heading_jitter_deg", self.heading_jitter_deg),
        ] {
            if !level.is_finite() || level < 0.0 {
                bail!("{name} must be a finite, non-negative number (got {level})");
            }
        }
        if !(self.sensor_sigma.is_finite() && self.sensor_sigma > 0.0) {
            bail!("sensor_sigma must be positive (got {})", self.sensor_sigma);
        }
        if !(self.confidence_radius.is_finite() && self.confidence_radius > 0.0) {
            bail!(
                "confidence_radius must be positive (got {})",
                self.confidence_radius
            );
        }
        if !(0.0..=1.0).contains(&self.confidence_fraction) {
            bail!(
                "confidence_fraction must lie in [0, 1] (got {})",
                self.confidence_fraction
            );
        }
        Ok(())
    }
}

/// Cumulative-weight index over the positively weighted part of a population.
///
/// Built once per cycle and consumed by sampling during that cycle only. The prefix sums are not
/// renormalized, so for an unnormalized population some draws find no candidate.
#[derive(Clone, Debug)]
pub struct WeightedDistribution<'a> {
    particles: Vec<&'a Pose>,
    cumulative: Vec<f64>,
}
impl<'a> WeightedDistribution<'a> {
    pub fn new(population: &'a [Pose]) -> Self {
        let mut particles = Vec::with_capacity(population.len());
        let mut cumulative = Vec::with_capacity(population.len());
        let mut total = 0.0;
        for particle in population.iter().filter(|p| p.weight > 0.0) {
            total += particle.weight;
            particles.push(particle);
            cumulative.push(total);
        }
        WeightedDistribution {
            particles,
            cumulative,
        }
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }
    pub fn total_weight(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
    /// First particle whose cumulative weight is not less than `u`.
    ///
    /// Returns `None` when the distribution is empty or `u` exceeds the total weight.
    pub fn pick_at(&self, u: f64) -> Option<&'a Pose> {
        let index = self.cumulative.partition_point(|&c| c < u);
        self.particles.get(index).copied()
    }
    /// Draw `u` uniformly in `[0, 1)` and pick with it.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&'a Pose> {
        self.pick_at(rng.random::<f64>())
    }
}

/// Redraw a population of the same cardinality in proportion to its weights.
///
/// Every pick becomes a fresh pose at the parent's position with "some" noise on position and
/// heading. The heading is `heading` when given (orientation known) and the parent's otherwise.
/// Draws that find no candidate are replaced by a random free pose. Returns the new population
/// and the number of such replacements.
pub fn resample<E, R>(
    population: &[Pose],
    env: &E,
    rng: &mut R,
    noise: &NoiseModel,
    heading: Option<f64>,
) -> (Vec<Pose>, usize)
where
    E: Environment,
    R: Rng + ?Sized,
{
    let distribution = WeightedDistribution::new(population);
    let mut next = Vec::with_capacity(population.len());
    let mut fallback_count = 0;
    for _ in 0..population.len() {
        let particle = match distribution.pick(rng) {
            Some(parent) => Pose::spawn_noisy(
                parent.x,
                parent.y,
                heading.unwrap_or(parent.heading),
                noise,
                rng,
            ),
            None => {
                fallback_count += 1;
                Pose::random_free(env, rng)
            }
        };
        next.push(particle);
    }
    (next, fallback_count)
}

/// Divide every weight by the total. A zero total leaves the weights untouched.
///
/// Returns the total before normalization.
pub fn normalize_weights(particles: &mut [Pose]) -> f64 {
    let sum: f64 = particles.iter().map(|p| p.weight).sum();
    if sum > 0.0 {
        for particle in particles.iter_mut() {
            particle.weight /= sum;
        }
    }
    sum
}

/// `(Σw)² / Σw²`, which is `1 / Σw²` for normalized weights and 0 when every weight is zero.
pub fn effective_sample_size(particles: &[Pose]) -> f64 {
    let sum: f64 = particles.iter().map(|p| p.weight).sum();
    let sum_of_squares: f64 = particles.iter().map(|p| p.weight * p.weight).sum();
    if sum_of_squares > 0.0 {
        sum * sum / sum_of_squares
    } else {
        0.0
    }
}

/// Weighted centroid of the population and whether it is a trustworthy position estimate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeanEstimate {
    pub x: f64,
    pub y: f64,
    pub confident: bool,
}
impl MeanEstimate {
    /// Sentinel for "no estimate available"
    pub const UNAVAILABLE: MeanEstimate = MeanEstimate {
        x: -1.0,
        y: -1.0,
        confident: false,
    };
    pub fn is_available(&self) -> bool {
        *self != MeanEstimate::UNAVAILABLE
    }
}

/// Compute the weighted centroid and test how tightly the population clusters around it.
///
/// The estimate is confident when strictly more than `fraction` of all particles lie strictly
/// within `radius` of the centroid. A zero weight sum yields [MeanEstimate::UNAVAILABLE].
pub fn compute_mean_point<E: Environment>(
    particles: &[Pose],
    env: &E,
    radius: f64,
    fraction: f64,
) -> MeanEstimate {
    let (weight_sum, weighted) = particles
        .iter()
        .fold((0.0, Vector2::<f64>::zeros()), |(sum, acc), p| {
            (sum + p.weight, acc + Vector2::new(p.x, p.y) * p.weight)
        });
    if weight_sum == 0.0 {
        return MeanEstimate::UNAVAILABLE;
    }
    let mean = weighted / weight_sum;
    let near = particles
        .iter()
        .filter(|p| env.distance(mean.x, mean.y, p.x, p.y) < radius)
        .count();
    MeanEstimate {
        x: mean.x,
        y: mean.y,
        confident: near as f64 > particles.len() as f64 * fraction,
    }
}

/// Outcome of one observation cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Estimate taken from the pre-resample weights
    pub estimate: MeanEstimate,
    /// Raw weight total before normalization
    pub weight_sum: f64,
    /// Effective sample size of the weighted population, before resampling
    pub effective_sample_size: f64,
    /// Resample draws replaced by random free particles
    pub fallback_count: usize,
}

#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Pose>,
    config: ParticleFilterConfig,
    noise: NoiseModel,
    sensor: BeaconDistanceModel,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleFilter")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("orientation_known", &self.config.orientation_known)
            .finish()
    }
}
impl ParticleFilter {
    /// Spread `config.num_particles` particles over random free places with random headings.
    pub fn new<E, R>(config: ParticleFilterConfig, env: &E, rng: &mut R) -> Self
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        let particles = (0..config.num_particles)
            .map(|_| Pose::random_free(env, rng))
            .collect();
        ParticleFilter::with_particles(config, particles)
    }
    /// Start from an explicit population. Its length becomes the fixed cardinality and overrides
    /// `config.num_particles`.
    pub fn with_particles(mut config: ParticleFilterConfig, particles: Vec<Pose>) -> Self {
        config.num_particles = particles.len();
        ParticleFilter {
            noise: config.noise_model(),
            sensor: config.sensor_model(),
            particles,
            config,
        }
    }
    pub fn particles(&self) -> &[Pose] {
        &self.particles
    }
    pub fn config(&self) -> &ParticleFilterConfig {
        &self.config
    }
    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn weight_sum(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }
    /// Score every particle against `reading`. Returns the resulting weight sum.
    pub fn assign_weights<E: Environment>(&mut self, env: &E, reading: f64) -> f64 {
        let sensor = self.sensor;
        #[cfg(feature = "parallel")]
        self.particles.par_iter_mut().for_each(|p| {
            let weight = sensor.score(env, p, reading);
            p.weight = weight;
        });
        #[cfg(not(feature = "parallel"))]
        self.particles.iter_mut().for_each(|p| {
            let weight = sensor.score(env, p, reading);
            p.weight = weight;
        });
        self.weight_sum()
    }
    pub fn estimate<E: Environment>(&self, env: &E) -> MeanEstimate {
        compute_mean_point(
            &self.particles,
            env,
            self.config.confidence_radius,
            self.config.confidence_fraction,
        )
    }
    pub fn normalize_weights(&mut self) -> f64 {
        normalize_weights(&mut self.particles)
    }
    /// Replace the population by a weighted redraw. Returns the number of random fallbacks.
    pub fn resample<E, R>(&mut self, env: &E, rng: &mut R, agent_heading: f64) -> usize
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        let heading = self.config.orientation_known.then_some(agent_heading);
        let (next, fallback_count) = resample(&self.particles, env, rng, &self.noise, heading);
        self.particles = next;
        fallback_count
    }
    /// Weight, estimate, normalize and resample against one reading.
    ///
    /// `agent_heading` is the agent's heading before it moves this cycle.
    pub fn observe<E, R>(
        &mut self,
        env: &E,
        rng: &mut R,
        reading: f64,
        agent_heading: f64,
    ) -> StepReport
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        let weight_sum = self.assign_weights(env, reading);
        let estimate = self.estimate(env);
        self.normalize_weights();
        let effective_sample_size = self.effective_sample_size();
        if weight_sum == 0.0 {
            warn!(
                "Total weight collapse: no particle supports reading {:.3}, repopulating {} particles",
                reading,
                self.particles.len()
            );
        } else {
            debug!(
                "Weight sum {:.4e}, effective sample size {:.1}",
                weight_sum, effective_sample_size
            );
        }
        let fallback_count = self.resample(env, rng, agent_heading);
        if fallback_count > 0 && weight_sum > 0.0 {
            debug!("{fallback_count} resample draws fell back to random free particles");
        }
        StepReport {
            estimate,
            weight_sum,
            effective_sample_size,
            fallback_count,
        }
    }
    /// Turn every particle by `heading_delta` and advance it by `speed` without noise.
    pub fn apply_motion(&mut self, heading_delta: f64, speed: f64) {
        for particle in self.particles.iter_mut() {
            particle.heading += heading_delta;
            particle.advance_by(speed);
        }
    }
    /// One complete localization cycle driven by `agent`, which moves as part of the cycle.
    pub fn step<E, R>(&mut self, env: &E, rng: &mut R, agent: &mut Agent) -> StepReport
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        let reading = agent.read_sensor(env, rng, &self.noise);
        let old_heading = agent.heading();
        let report = self.observe(env, rng, reading, old_heading);
        agent.move_in(env, rng, &self.noise);
        self.apply_motion(heading_delta(old_heading, agent.heading()), agent.speed());
        report
    }
    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.particles)
    }
    /// Share of the population within `radius` of `(x, y)`.
    pub fn fraction_near<E: Environment>(&self, env: &E, x: f64, y: f64, radius: f64) -> f64 {
        if self.particles.is_empty() {
            return 0.0;
        }
        let near = self
            .particles
            .iter()
            .filter(|p| env.distance(x, y, p.x, p.y) < radius)
            .count();
        near as f64 / self.particles.len() as f64
    }
}
