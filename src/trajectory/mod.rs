//! Trajectory segments, their background producer and advantage estimation.

pub mod gae;
pub mod producer;

pub use gae::{gae, AdvantageEstimate};
pub use producer::{EpisodeSummaries, ProducerConfig, TrajectoryProducer};

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{A3cError, Result};

/// A recorded segment of agent-environment interaction.
///
/// A segment holds at most `trajectory_length` steps. It is cut early when an
/// episode ends, in which case `dones` is true only at the last index and
/// `bootstrap_value` is zero; `num_timesteps` is always the true length.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    /// `(num_timesteps, observation_size)`
    pub observations: Array2<f32>,
    pub actions: Vec<usize>,
    pub rewards: Array1<f32>,
    pub dones: Vec<bool>,
    /// Value estimate of the observation after the last step, 0 on termination
    pub bootstrap_value: f32,
    /// Recurrent state at the start of the segment
    pub initial_state: Option<Array1<f32>>,
    pub num_timesteps: usize,
}

impl Trajectory {
    pub fn is_empty(&self) -> bool {
        self.num_timesteps == 0
    }

    /// True when the segment ends on an episode termination
    pub fn ends_episode(&self) -> bool {
        self.dones.last().copied().unwrap_or(false)
    }

    pub fn total_reward(&self) -> f32 {
        self.rewards.sum()
    }
}

/// Accumulates one segment step by step.
#[derive(Debug)]
pub struct TrajectoryBuilder {
    observation_size: usize,
    observations: Vec<f32>,
    actions: Vec<usize>,
    rewards: Vec<f32>,
    dones: Vec<bool>,
    initial_state: Option<Array1<f32>>,
}

impl TrajectoryBuilder {
    pub fn new(observation_size: usize, capacity: usize, initial_state: Option<Array1<f32>>) -> Self {
        TrajectoryBuilder {
            observation_size,
            observations: Vec::with_capacity(capacity * observation_size),
            actions: Vec::with_capacity(capacity),
            rewards: Vec::with_capacity(capacity),
            dones: Vec::with_capacity(capacity),
            initial_state,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn push(&mut self, observation: ArrayView1<f32>, action: usize, reward: f32, done: bool) -> Result<()> {
        if observation.len() != self.observation_size {
            return Err(A3cError::dimension_mismatch(
                format!("{} observation features", self.observation_size),
                format!("{} observation features", observation.len()),
            ));
        }
        self.observations.extend(observation.iter());
        self.actions.push(action);
        self.rewards.push(reward);
        self.dones.push(done);
        Ok(())
    }

    pub fn finish(self, bootstrap_value: f32) -> Result<Trajectory> {
        let num_timesteps = self.actions.len();
        if num_timesteps == 0 {
            return Err(A3cError::EmptyTrajectory);
        }
        let observations = Array2::from_shape_vec((num_timesteps, self.observation_size), self.observations)
            .map_err(|e| A3cError::Numerical(e.to_string()))?;
        Ok(Trajectory {
            observations,
            actions: self.actions,
            rewards: Array1::from_vec(self.rewards),
            dones: self.dones,
            bootstrap_value,
            initial_state: self.initial_state,
            num_timesteps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_builder_records_true_length() {
        let mut builder = TrajectoryBuilder::new(2, 5, None);
        builder.push(arr1(&[0.0, 1.0]).view(), 1, 0.5, false).unwrap();
        builder.push(arr1(&[1.0, 0.0]).view(), 0, 1.0, true).unwrap();
        let traj = builder.finish(0.0).unwrap();
        assert_eq!(traj.num_timesteps, 2);
        assert_eq!(traj.observations.shape(), [2, 2]);
        assert!(traj.ends_episode());
        assert_eq!(traj.total_reward(), 1.5);
    }

    #[test]
    fn test_empty_segment_is_rejected() {
        let builder = TrajectoryBuilder::new(2, 5, None);
        assert!(matches!(builder.finish(0.0), Err(A3cError::EmptyTrajectory)));
    }

    #[test]
    fn test_observation_size_checked() {
        let mut builder = TrajectoryBuilder::new(3, 1, None);
        assert!(builder.push(arr1(&[0.0]).view(), 0, 0.0, false).is_err());
    }
}
