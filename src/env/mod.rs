//! Environment contract and the built-in simulators.

pub mod cartpole;
pub mod corridor;
pub mod registry;
pub mod wrappers;

pub use cartpole::CartPole;
pub use corridor::Corridor;
pub use registry::{make_env, registered_envs};
pub use wrappers::{read_recording, EpisodeRecord, RecordingEnv};

use ndarray::Array1;
use serde_json::{Map, Value};

use crate::error::Result;

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step {
    pub observation: Array1<f32>,
    pub reward: f32,
    pub done: bool,
    /// Simulator-specific diagnostics
    pub info: Map<String, Value>,
}

impl Step {
    pub fn new(observation: Array1<f32>, reward: f32, done: bool) -> Self {
        Step {
            observation,
            reward,
            done,
            info: Map::new(),
        }
    }
}

/// Synchronous, discrete-action simulator.
///
/// Every failure of `reset`, `step` or `render` is fatal to the caller.
pub trait Environment: Send {
    fn id(&self) -> &str;

    fn observation_size(&self) -> usize;

    fn num_actions(&self) -> usize;

    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Result<Array1<f32>>;

    fn step(&mut self, action: usize) -> Result<Step>;

    fn render(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reseed the simulator's random source.
    fn seed(&mut self, _seed: u64) {}
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn observation_size(&self) -> usize {
        (**self).observation_size()
    }

    fn num_actions(&self) -> usize {
        (**self).num_actions()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        (**self).reset()
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        (**self).step(action)
    }

    fn render(&mut self) -> Result<()> {
        (**self).render()
    }

    fn seed(&mut self, seed: u64) {
        (**self).seed(seed)
    }
}
