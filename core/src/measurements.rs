//! Beacon-distance sensor model.
//!
//! The only sensor in this system measures the distance to the nearest beacon. A hypothesis is
//! scored by comparing what it would read against what the agent actually read, using a Gaussian
//! similarity kernel. Hypotheses sitting in occupied space are scored zero without consulting
//! the kernel.
use std::fmt::{self, Display};

use crate::{Environment, Pose};

pub const DEFAULT_SENSOR_SIGMA: f64 = 0.9;

/// Symmetric similarity kernel `exp(-(a - b)^2 / (2 sigma^2))`.
///
/// Returns 1 when the readings match and decays towards 0 as they diverge. The result is clamped
/// to `f64::MIN_POSITIVE`, so readings far apart on large maps never score exactly 0.
pub fn gaussian_kernel(reference: f64, hypothesis: f64, sigma: f64) -> f64 {
    let error = reference - hypothesis;
    (-(error * error) / (2.0 * sigma * sigma))
        .exp()
        .max(f64::MIN_POSITIVE)
}

/// Sensor model scoring pose hypotheses against a nearest-beacon reading.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BeaconDistanceModel {
    /// Standard deviation of the similarity kernel
    pub sigma: f64,
}
impl Default for BeaconDistanceModel {
    fn default() -> Self {
        BeaconDistanceModel {
            sigma: DEFAULT_SENSOR_SIGMA,
        }
    }
}
impl Display for BeaconDistanceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BeaconDistanceModel(sigma: {})", self.sigma)
    }
}
impl BeaconDistanceModel {
    pub fn new(sigma: f64) -> Self {
        BeaconDistanceModel { sigma }
    }
    /// Importance weight of a hypothesis reading given the reference reading.
    pub fn weight(&self, reference: f64, hypothesis: f64) -> f64 {
        gaussian_kernel(reference, hypothesis, self.sigma)
    }
    /// Score a pose against a reading. Poses in non-free space get exactly 0.
    pub fn score<E: Environment>(&self, env: &E, pose: &Pose, reading: f64) -> f64 {
        if env.is_free(pose.x, pose.y) {
            self.weight(reading, pose.read_sensor(env))
        } else {
            0.0
        }
    }
}
