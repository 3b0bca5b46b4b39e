//! The true moving agent whose noisy readings drive the filter.
//!
//! The agent shares the [Pose] representation with the particles and adds its own nominal speed
//! and turning policy: it walks straight ahead until a wall is in the way, then picks a fresh
//! random direction.
use log::warn;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::noise::{NoiseModel, random_heading};
use crate::{Environment, Pose};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Nominal distance covered per cycle
    pub speed: f64,
    /// Upper bound on move attempts per cycle before the agent gives up and stays put
    pub max_move_attempts: usize,
}
impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            speed: 0.2,
            max_move_attempts: 1000,
        }
    }
}
impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            anyhow::bail!("agent speed must be positive (got {})", self.speed);
        }
        if self.max_move_attempts == 0 {
            anyhow::bail!("max_move_attempts must be at least 1");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Agent {
    pose: Pose,
    speed: f64,
    max_move_attempts: usize,
    step_count: usize,
}
impl Agent {
    /// Place the agent at a random free spot facing a random direction.
    pub fn new<E, R>(env: &E, rng: &mut R, config: &AgentConfig) -> Agent
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        Agent::at(Pose::random_free(env, rng), config)
    }
    pub fn at(pose: Pose, config: &AgentConfig) -> Agent {
        Agent {
            pose,
            speed: config.speed,
            max_move_attempts: config.max_move_attempts,
            step_count: 0,
        }
    }
    pub fn pose(&self) -> &Pose {
        &self.pose
    }
    pub fn heading(&self) -> f64 {
        self.pose.heading
    }
    pub fn speed(&self) -> f64 {
        self.speed
    }
    /// Total number of move attempts so far.
    pub fn step_count(&self) -> usize {
        self.step_count
    }
    pub fn choose_random_direction<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.pose.heading = random_heading(rng);
    }
    /// True distance to the nearest beacon plus "little" noise.
    pub fn read_sensor<E, R>(&self, env: &E, rng: &mut R, noise: &NoiseModel) -> f64
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        let [reading] = noise.add_little_noise(rng, [self.pose.read_sensor(env)]);
        reading
    }
    /// Advance by the nominal speed into free space, turning randomly whenever blocked.
    ///
    /// Returns whether the agent moved. After `max_move_attempts` failed attempts it stays put.
    pub fn move_in<E, R>(&mut self, env: &E, rng: &mut R, noise: &NoiseModel) -> bool
    where
        E: Environment,
        R: Rng + ?Sized,
    {
        for _ in 0..self.max_move_attempts {
            self.step_count += 1;
            let moved = self
                .pose
                .advance(self.speed, Some(noise), rng, |p, dx, dy| {
                    env.is_free(p.x + dx, p.y + dy)
                });
            if moved {
                return true;
            }
            self.choose_random_direction(rng);
        }
        warn!(
            "Agent at ({:.3}, {:.3}) found no free move in {} attempts, staying put",
            self.pose.x, self.pose.y, self.max_move_attempts
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maze::Maze;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// A unit square surrounded by walls.
    struct Pen;
    impl Environment for Pen {
        fn is_free(&self, x: f64, y: f64) -> bool {
            (0.0..1.0).contains(&x) && (0.0..1.0).contains(&y)
        }
        fn distance_to_nearest_beacon(&self, x: f64, y: f64) -> f64 {
            x.hypot(y)
        }
        fn random_free_place<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
            (rng.random_range(0.0..1.0), rng.random_range(0.0..1.0))
        }
    }

    /// No free space at all.
    struct Solid;
    impl Environment for Solid {
        fn is_free(&self, _x: f64, _y: f64) -> bool {
            false
        }
        fn distance_to_nearest_beacon(&self, _x: f64, _y: f64) -> f64 {
            1.0
        }
        fn random_free_place<R: Rng + ?Sized>(&self, _rng: &mut R) -> (f64, f64) {
            (0.0, 0.0)
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
        let bad = AgentConfig {
            speed: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = AgentConfig {
            max_move_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn starts_in_free_space() {
        let maze = Maze::reference();
        let mut rng = StdRng::seed_from_u64(41);
        for _ in 0..50 {
            let agent = Agent::new(&maze, &mut rng, &AgentConfig::default());
            assert!(maze.is_free(agent.pose().x, agent.pose().y));
            assert!((0.0..360.0).contains(&agent.heading()));
            assert_eq!(agent.step_count(), 0);
        }
    }

    #[test]
    fn sensor_reading_is_close_to_truth() {
        let mut rng = StdRng::seed_from_u64(42);
        let agent = Agent::at(Pose::new(0.3, 0.4, 0.0), &AgentConfig::default());
        let noise = NoiseModel::default();
        for _ in 0..100 {
            let reading = agent.read_sensor(&Pen, &mut rng, &noise);
            assert!((reading - 0.5).abs() <= noise.little + 1e-12);
        }
    }

    #[test]
    fn moves_stay_in_free_space() {
        let maze = Maze::reference();
        let mut rng = StdRng::seed_from_u64(43);
        let mut agent = Agent::new(&maze, &mut rng, &AgentConfig::default());
        let noise = NoiseModel::default();
        for _ in 0..200 {
            assert!(agent.move_in(&maze, &mut rng, &noise));
            assert!(maze.is_free(agent.pose().x, agent.pose().y));
        }
        assert!(agent.step_count() >= 200);
    }

    #[test]
    fn blocked_agent_turns() {
        let mut rng = StdRng::seed_from_u64(44);
        // Facing the wall at x = 1 from right next to it.
        let mut agent = Agent::at(Pose::new(0.95, 0.5, 90.0), &AgentConfig::default());
        let noise = NoiseModel::default();
        assert!(agent.move_in(&Pen, &mut rng, &noise));
        assert!(Pen.is_free(agent.pose().x, agent.pose().y));
        assert!(agent.step_count() > 1);
        assert_ne!(agent.heading(), 90.0);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut rng = StdRng::seed_from_u64(45);
        let config = AgentConfig {
            max_move_attempts: 25,
            ..Default::default()
        };
        let mut agent = Agent::at(Pose::new(0.0, 0.0, 0.0), &config);
        assert!(!agent.move_in(&Solid, &mut rng, &NoiseModel::default()));
        assert_eq!(agent.pose().xy(), (0.0, 0.0));
        assert_eq!(agent.step_count(), 25);
    }
}
