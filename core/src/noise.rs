//! Bounded uniform noise for poses, headings and speeds.
//!
//! Two levels are used by convention: "little" noise when an agent moves and "some" noise when a
//! particle is (re)born during resampling. Headings additionally get a dedicated jitter while
//! moving, because heading dispersion has to be larger than positional dispersion for the
//! population not to lock onto a wrong orientation early.
use rand::Rng;
use rand_distr::{Distribution, Uniform};

pub const DEFAULT_LITTLE_NOISE: f64 = 0.02;
pub const DEFAULT_SOME_NOISE: f64 = 0.1;
pub const DEFAULT_HEADING_JITTER_DEG: f64 = 3.0;

/// Add an independent uniform offset in `[-level, level]` to each value.
///
/// A negative or non-finite level leaves the values untouched.
pub fn perturb<R: Rng + ?Sized, const N: usize>(
    rng: &mut R,
    level: f64,
    mut values: [f64; N],
) -> [f64; N] {
    let Ok(offset) = Uniform::<f64>::new_inclusive(-level, level) else {
        return values;
    };
    for value in values.iter_mut() {
        *value += offset.sample(rng);
    }
    values
}

/// Uniformly random heading in `[0, 360)` degrees.
pub fn random_heading<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.random_range(0.0..360.0)
}

/// The tunable noise levels used by particles and the agent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseModel {
    pub little: f64,
    pub some: f64,
    pub heading_jitter_deg: f64,
}
impl Default for NoiseModel {
    fn default() -> Self {
        NoiseModel {
            little: DEFAULT_LITTLE_NOISE,
            some: DEFAULT_SOME_NOISE,
            heading_jitter_deg: DEFAULT_HEADING_JITTER_DEG,
        }
    }
}
impl NoiseModel {
    pub fn new(little: f64, some: f64, heading_jitter_deg: f64) -> Self {
        NoiseModel {
            little,
            some,
            heading_jitter_deg,
        }
    }
    pub fn add_little_noise<R: Rng + ?Sized, const N: usize>(
        &self,
        rng: &mut R,
        values: [f64; N],
    ) -> [f64; N] {
        perturb(rng, self.little, values)
    }
    pub fn add_some_noise<R: Rng + ?Sized, const N: usize>(
        &self,
        rng: &mut R,
        values: [f64; N],
    ) -> [f64; N] {
        perturb(rng, self.some, values)
    }
    /// Extra heading offset in `[-heading_jitter_deg, heading_jitter_deg]`.
    pub fn heading_jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let [jitter] = perturb(rng, self.heading_jitter_deg, [0.0]);
        jitter
    }
}
