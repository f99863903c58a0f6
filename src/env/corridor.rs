use ndarray::Array1;

use crate::error::{A3cError, Result};

use super::{Environment, Step};

/// Deterministic one-dimensional walk.
///
/// The agent starts in cell 0 of `length` cells and observes a one-hot
/// position. Action 1 moves right, action 0 moves left (clamped at the
/// wall). Reaching the last cell pays `1.0` and ends the episode; otherwise
/// every step pays nothing and the episode is cut after `max_steps`.
#[derive(Debug, Clone)]
pub struct Corridor {
    length: usize,
    max_steps: usize,
    position: usize,
    steps: usize,
    needs_reset: bool,
}

impl Corridor {
    pub fn new(length: usize, max_steps: usize) -> Result<Self> {
        if length < 2 || max_steps == 0 {
            return Err(A3cError::invalid_parameter(
                "corridor",
                "length must be at least 2 and max_steps positive",
            ));
        }
        Ok(Corridor {
            length,
            max_steps,
            position: 0,
            steps: 0,
            needs_reset: true,
        })
    }

    fn observation(&self) -> Array1<f32> {
        let mut obs = Array1::zeros(self.length);
        obs[self.position] = 1.0;
        obs
    }
}

impl Environment for Corridor {
    fn id(&self) -> &str {
        "Corridor-v0"
    }

    fn observation_size(&self) -> usize {
        self.length
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.position = 0;
        self.steps = 0;
        self.needs_reset = false;
        Ok(self.observation())
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        if self.needs_reset {
            return Err(A3cError::environment("step called before reset or after the episode ended"));
        }
        match action {
            0 => self.position = self.position.saturating_sub(1),
            1 => self.position = (self.position + 1).min(self.length - 1),
            other => return Err(A3cError::environment(format!("invalid action {} for Corridor", other))),
        }
        self.steps += 1;

        let reached = self.position == self.length - 1;
        let done = reached || self.steps >= self.max_steps;
        self.needs_reset = done;
        Ok(Step::new(self.observation(), if reached { 1.0 } else { 0.0 }, done))
    }
}
