//! Monte Carlo localization toolbox
//!
//! This crate implements a particle filter that estimates where an agent is (and which way it is
//! facing) inside a known, static map using nothing but a very poor sensor: the approximate
//! distance to the nearest beacon. The filter keeps a population of weighted pose hypotheses
//! ("particles"), scores every one of them against each new reading, and redraws the population
//! in proportion to those scores. After a handful of cycles the particles collapse around the
//! agent and the filter reports a confident position estimate.
//!
//! ## Crate overview
//!
//! - [noise]: bounded uniform perturbations applied to positions, headings and speeds.
//! - [measurements]: the beacon-distance sensor model and the similarity kernel that turns a pair
//!   of readings into an importance weight.
//! - [particle]: the weighted resampler, the confidence estimator and the [particle::ParticleFilter]
//!   that owns the population across cycles.
//! - [maze]: a grid map with beacons that implements the [Environment] port.
//! - [agent]: the "true" moving agent whose readings drive the filter.
//! - [sim]: configuration files, the simulation runner and CSV export of per-cycle results.
//!
//! ## Coordinates and headings
//!
//! Positions are planar `(x, y)` values in the environment's own units. Headings are in degrees,
//! measured clockwise from the positive y axis, so a heading of 0 moves along +y and a heading of
//! 90 moves along +x. Headings are conventionally kept in `[0, 360)` but are never wrapped by the
//! filter itself; particles inherit the agent's turning by simple addition.
//!
//! ## Randomness
//!
//! Nothing in this crate reaches for a global random source. Every component that samples takes
//! an explicit `&mut R where R: rand::Rng`, so a seeded [rand::rngs::StdRng] makes whole runs
//! reproducible.
//!
//! ## Example
//!
//! ```rust
//! use mcl::agent::{Agent, AgentConfig};
//! use mcl::maze::Maze;
//! use mcl::particle::{ParticleFilter, ParticleFilterConfig};
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let maze = Maze::reference();
//! let mut rng = StdRng::seed_from_u64(7);
//! let mut agent = Agent::new(&maze, &mut rng, &AgentConfig::default());
//! let config = ParticleFilterConfig { num_particles: 500, ..Default::default() };
//! let mut pf = ParticleFilter::new(config, &maze, &mut rng);
//!
//! for _ in 0..10 {
//!     let report = pf.step(&maze, &mut rng, &mut agent);
//!     println!("{:?}", report.estimate);
//! }
//! assert_eq!(pf.particles().len(), 500);
//! ```
pub mod agent;
pub mod maze;
pub mod measurements;
pub mod noise;
pub mod particle;
pub mod sim;

use std::fmt::{self, Display};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::noise::{NoiseModel, random_heading};

/// The map the filter localizes against.
///
/// The environment is shared read-only by every component for the whole run. None of its
/// operations can fail: inputs are assumed to be in bounds and the map never changes.
pub trait Environment: Sync {
    /// True iff the coordinate lies in navigable space.
    fn is_free(&self, x: f64, y: f64) -> bool;
    /// Distance from a point to the closest landmark. This is the sensor model.
    fn distance_to_nearest_beacon(&self, x: f64, y: f64) -> f64;
    /// Draw a navigable coordinate.
    fn random_free_place<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64);
    /// Metric used to decide whether particles cluster around an estimate.
    fn distance(&self, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
        ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()
    }
}

/// A planar pose hypothesis: position, heading in degrees and importance weight.
///
/// The same value type is used for particles and for the true agent; the weight is meaningless
/// for the latter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub weight: f64,
}
impl Default for Pose {
    fn default() -> Self {
        Pose {
            x: 0.0,
            y: 0.0,
            heading: 0.0,
            weight: 1.0,
        }
    }
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pose")
            .field("x", &format_args!("{:.4}", self.x))
            .field("y", &format_args!("{:.4}", self.y))
            .field("heading", &format_args!("{:.2}°", self.heading))
            .field("weight", &format_args!("{:.4e}", self.weight))
            .finish()
    }
}
impl Pose {
    /// Create a pose with unit weight.
    pub fn new(x: f64, y: f64, heading: f64) -> Pose {
        Pose {
            x,
            y,
            heading,
            weight: 1.0,
        }
    }
    /// Create a pose at the given position facing a uniformly random direction.
    pub fn with_random_heading<R: Rng + ?Sized>(x: f64, y: f64, rng: &mut R) -> Pose {
        Pose::new(x, y, random_heading(rng))
    }
    /// Create a pose at a random free place of the environment with a random heading.
    pub fn random_free<E: Environment, R: Rng + ?Sized>(env: &E, rng: &mut R) -> Pose {
        let (x, y) = env.random_free_place(rng);
        Pose::with_random_heading(x, y, rng)
    }
    /// Create a pose at the given position and heading, perturbing all three by the "some noise"
    /// level of the noise model. Used when a particle is reborn during resampling.
    pub fn spawn_noisy<R: Rng + ?Sized>(
        x: f64,
        y: f64,
        heading: f64,
        noise: &NoiseModel,
        rng: &mut R,
    ) -> Pose {
        let [x, y, heading] = noise.add_some_noise(rng, [x, y, heading]);
        Pose::new(x, y, heading)
    }
    pub fn xy(&self) -> (f64, f64) {
        (self.x, self.y)
    }
    /// What a perfect sensor would read from this pose.
    pub fn read_sensor<E: Environment>(&self, env: &E) -> f64 {
        env.distance_to_nearest_beacon(self.x, self.y)
    }
    pub fn move_by(&mut self, dx: f64, dy: f64) {
        self.x += dx;
        self.y += dy;
    }
    /// Move `speed` units along the current heading, without noise and without any check.
    ///
    /// A negative speed moves backwards.
    pub fn advance_by(&mut self, speed: f64) {
        let (dx, dy) = displacement(self.heading, speed);
        self.move_by(dx, dy);
    }
    /// Move `speed` units along the current heading.
    ///
    /// With a noise model, speed and heading receive "little" noise and the heading additionally
    /// receives the dedicated heading jitter; the stored heading itself is left untouched. The
    /// move is applied only if `accept(self, dx, dy)` returns true, which lets a caller reject
    /// moves that would cross an obstacle. Returns whether the move was applied.
    pub fn advance<R, F>(
        &mut self,
        speed: f64,
        noise: Option<&NoiseModel>,
        rng: &mut R,
        accept: F,
    ) -> bool
    where
        R: Rng + ?Sized,
        F: FnOnce(&Pose, f64, f64) -> bool,
    {
        let (speed, heading) = match noise {
            Some(noise) => {
                let [speed, heading] = noise.add_little_noise(rng, [speed, self.heading]);
                (speed, heading + noise.heading_jitter(rng))
            }
            None => (speed, self.heading),
        };
        let (dx, dy) = displacement(heading, speed);
        if accept(self, dx, dy) {
            self.move_by(dx, dy);
            true
        } else {
            false
        }
    }
}

/// Planar displacement for moving `speed` units along `heading_deg`.
///
/// Heading 0 points along +y and headings grow clockwise.
pub fn displacement(heading_deg: f64, speed: f64) -> (f64, f64) {
    let r = heading_deg.to_radians();
    (r.sin() * speed, r.cos() * speed)
}

/// Turn performed between two headings, without wrapping.
pub fn heading_delta(before: f64, after: f64) -> f64 {
    after - before
}

/// Wrap an angle to the range 0 to 360 degrees
///
/// # Example
/// ```rust
/// use mcl::wrap_to_360;
/// assert_eq!(wrap_to_360(370.0), 10.0);
/// assert_eq!(wrap_to_360(-90.0), 270.0);
/// ```
pub fn wrap_to_360(angle: f64) -> f64 {
    let mut wrapped = angle;
    while wrapped >= 360.0 {
        wrapped -= 360.0;
    }
    while wrapped < 0.0 {
        wrapped += 360.0;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_wrap_to_360() {
        assert_eq!(wrap_to_360(370.0), 10.0);
        assert_eq!(wrap_to_360(-10.0), 350.0);
        assert_eq!(wrap_to_360(0.0), 0.0);
        assert_eq!(wrap_to_360(360.0), 0.0);
    }

    #[test]
    fn displacement_follows_compass_convention() {
        let (dx, dy) = displacement(0.0, 1.0);
        assert_approx_eq!(dx, 0.0, 1e-12);
        assert_approx_eq!(dy, 1.0, 1e-12);
        let (dx, dy) = displacement(90.0, 2.0);
        assert_approx_eq!(dx, 2.0, 1e-12);
        assert_approx_eq!(dy, 0.0, 1e-12);
        let (dx, dy) = displacement(180.0, -1.0);
        assert_approx_eq!(dx, 0.0, 1e-12);
        assert_approx_eq!(dy, 1.0, 1e-12);
    }

    #[test]
    fn advance_by_moves_along_heading() {
        let mut pose = Pose::new(1.0, 1.0, 90.0);
        pose.advance_by(0.5);
        assert_approx_eq!(pose.x, 1.5, 1e-12);
        assert_approx_eq!(pose.y, 1.0, 1e-12);
        assert_eq!(pose.heading, 90.0);
    }

    #[test]
    fn advance_respects_rejection() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pose = Pose::new(1.0, 1.0, 0.0);
        let moved = pose.advance(1.0, None, &mut rng, |_, _, _| false);
        assert!(!moved);
        assert_eq!(pose.xy(), (1.0, 1.0));

        let moved = pose.advance(1.0, None, &mut rng, |p, dx, dy| p.y + dy < 3.0 && dx.abs() < 1e-9);
        assert!(moved);
        assert_approx_eq!(pose.y, 2.0, 1e-12);
    }

    #[test]
    fn noisy_advance_keeps_stored_heading() {
        let mut rng = StdRng::seed_from_u64(2);
        let noise = NoiseModel::default();
        let mut pose = Pose::new(0.0, 0.0, 45.0);
        assert!(pose.advance(0.2, Some(&noise), &mut rng, |_, _, _| true));
        assert_eq!(pose.heading, 45.0);
        let travelled = (pose.x.powi(2) + pose.y.powi(2)).sqrt();
        assert!(travelled > 0.2 - 0.02 - 1e-12 && travelled < 0.2 + 0.02 + 1e-12);
    }

    #[test]
    fn spawn_noisy_stays_within_noise_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let noise = NoiseModel::default();
        for _ in 0..100 {
            let pose = Pose::spawn_noisy(5.0, 5.0, 180.0, &noise, &mut rng);
            assert!((pose.x - 5.0).abs() <= 0.1 + 1e-9);
            assert!((pose.y - 5.0).abs() <= 0.1 + 1e-9);
            assert!((pose.heading - 180.0).abs() <= 0.1 + 1e-9);
            assert_eq!(pose.weight, 1.0);
        }
    }

    #[test]
    fn heading_delta_is_unwrapped() {
        assert_eq!(heading_delta(350.0, 10.0), -340.0);
        assert_eq!(heading_delta(10.0, 40.0), 30.0);
    }
}
