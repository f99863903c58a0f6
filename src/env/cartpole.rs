//! Classic cart-pole balancing task

use ndarray::{arr1, Array1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{A3cError, Result};

use super::{Environment, Step};

#[derive(Debug, Clone)]
struct CartPoleState {
    x: f64,         // cart position
    x_dot: f64,     // cart velocity
    theta: f64,     // pole angle
    theta_dot: f64, // pole angular velocity
}

#[derive(Debug, Clone)]
struct CartPoleConfig {
    gravity: f64,
    mass_cart: f64,
    mass_pole: f64,
    length: f64,
    force_mag: f64,
    tau: f64,
    max_steps: usize,
    x_threshold: f64,
    theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            max_steps: 500,
            x_threshold: 2.4,
            theta_threshold: 12.0 * 2.0 * std::f64::consts::PI / 360.0,
        }
    }
}

/// Cart-pole: push the cart left (0) or right (1) to keep the pole upright.
///
/// Reward is 1 per step; the episode ends when the pole falls, the cart
/// leaves the track, or `max_steps` is reached.
pub struct CartPole {
    id: String,
    state: CartPoleState,
    config: CartPoleConfig,
    steps: usize,
    needs_reset: bool,
    rng: StdRng,
}

impl CartPole {
    pub fn new() -> Self {
        Self::with_max_steps(500)
    }

    /// `CartPole-v0` uses 200 steps, `CartPole-v1` 500.
    pub fn with_max_steps(max_steps: usize) -> Self {
        CartPole {
            id: if max_steps == 200 { "CartPole-v0" } else { "CartPole-v1" }.to_string(),
            state: CartPoleState {
                x: 0.0,
                x_dot: 0.0,
                theta: 0.0,
                theta_dot: 0.0,
            },
            config: CartPoleConfig {
                max_steps,
                ..CartPoleConfig::default()
            },
            steps: 0,
            needs_reset: true,
            rng: StdRng::from_entropy(),
        }
    }

    fn observation(&self) -> Array1<f32> {
        arr1(&[
            self.state.x as f32,
            self.state.x_dot as f32,
            self.state.theta as f32,
            self.state.theta_dot as f32,
        ])
    }

    fn is_failed(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold || self.state.theta.abs() > self.config.theta_threshold
    }
}

impl Default for CartPole {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for CartPole {
    fn id(&self) -> &str {
        &self.id
    }

    fn observation_size(&self) -> usize {
        4
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.state = CartPoleState {
            x: self.rng.gen_range(-0.05..0.05),
            x_dot: self.rng.gen_range(-0.05..0.05),
            theta: self.rng.gen_range(-0.05..0.05),
            theta_dot: self.rng.gen_range(-0.05..0.05),
        };
        self.steps = 0;
        self.needs_reset = false;
        Ok(self.observation())
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        if self.needs_reset {
            return Err(A3cError::environment("step called before reset or after the episode ended"));
        }
        let force = match action {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            other => return Err(A3cError::environment(format!("invalid action {} for CartPole", other))),
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp = (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        let dt = self.config.tau;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;
        self.steps += 1;

        let failed = self.is_failed();
        let truncated = !failed && self.steps >= self.config.max_steps;
        let done = failed || truncated;
        self.needs_reset = done;

        let mut step = Step::new(self.observation(), 1.0, done);
        if truncated {
            step.info.insert("TimeLimit.truncated".to_string(), true.into());
        }
        Ok(step)
    }

    fn render(&mut self) -> Result<()> {
        const WIDTH: usize = 41;
        let span = 2.0 * self.config.x_threshold;
        let pos = ((self.state.x + self.config.x_threshold) / span * (WIDTH - 1) as f64)
            .round()
            .clamp(0.0, (WIDTH - 1) as f64) as usize;
        let mut track = vec!['-'; WIDTH];
        track[pos] = if self.state.theta < -0.05 {
            '\\'
        } else if self.state.theta > 0.05 {
            '/'
        } else {
            '|'
        };
        println!("{} step {:>3} theta {:+.3}", track.into_iter().collect::<String>(), self.steps, self.state.theta);
        Ok(())
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_is_near_upright() {
        let mut env = CartPole::new();
        env.seed(0);
        let obs = env.reset().unwrap();
        assert_eq!(obs.len(), 4);
        assert!(obs.iter().all(|x| x.abs() <= 0.05));
    }

    #[test]
    fn test_constant_push_ends_episode() {
        let mut env = CartPole::new();
        env.seed(1);
        env.reset().unwrap();
        let mut steps = 0;
        loop {
            steps += 1;
            if env.step(1).unwrap().done {
                break;
            }
        }
        assert!(steps < 100);
        assert!(env.step(1).is_err());
    }

    #[test]
    fn test_seeded_resets_are_identical() {
        let mut a = CartPole::new();
        let mut b = CartPole::new();
        a.seed(42);
        b.seed(42);
        assert_eq!(a.reset().unwrap(), b.reset().unwrap());
    }

    #[test]
    fn test_invalid_action_is_an_error() {
        let mut env = CartPole::new();
        env.reset().unwrap();
        assert!(matches!(env.step(2), Err(A3cError::Environment(_))));
    }
}
