//! Background trajectory collection.
//!
//! The producer owns the environment. Once started, a dedicated thread
//! interacts with it using the local policy and publishes fixed-length
//! segments into a bounded channel. The channel applies backpressure in both
//! directions: the thread blocks while the queue is full and [`next`] blocks
//! while it is empty.
//!
//! [`next`]: TrajectoryProducer::next

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use crate::env::Environment;
use crate::error::{A3cError, Result};
use crate::global_step::GlobalStep;
use crate::policy::PolicyHandle;
use crate::summary::SummarySink;

use super::{Trajectory, TrajectoryBuilder};

/// Default number of queued, unconsumed trajectories
pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

#[derive(Clone, Debug, PartialEq)]
pub struct ProducerConfig {
    pub trajectory_length: usize,
    pub queue_capacity: usize,
    /// Seed of the action-sampling generator; random when `None`
    pub seed: Option<u64>,
}

impl ProducerConfig {
    pub fn new(trajectory_length: usize) -> Self {
        ProducerConfig {
            trajectory_length,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.trajectory_length == 0 {
            return Err(A3cError::invalid_parameter("trajectory_length", "must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(A3cError::invalid_parameter("queue_capacity", "must be positive"));
        }
        Ok(())
    }
}

/// Where and how often the producer reports finished episodes
#[derive(Clone)]
pub struct EpisodeSummaries {
    pub sink: SummarySink,
    pub step: GlobalStep,
    pub summary_period: u64,
}

/// Fills a bounded queue with trajectories collected on a background thread.
pub struct TrajectoryProducer {
    config: ProducerConfig,
    policy: PolicyHandle,
    env: Option<Box<dyn Environment>>,
    receiver: Option<Receiver<Result<Trajectory>>>,
    stop_flag: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl TrajectoryProducer {
    /// `policy` is the handle the producer acts with (normally the local policy).
    pub fn new(env: Box<dyn Environment>, policy: PolicyHandle, config: ProducerConfig) -> Result<Self> {
        config.validate()?;
        if env.observation_size() != policy.policy().observation_size() || env.num_actions() != policy.policy().num_actions() {
            return Err(A3cError::dimension_mismatch(
                format!("{} observations / {} actions", policy.policy().observation_size(), policy.policy().num_actions()),
                format!("{} observations / {} actions from {}", env.observation_size(), env.num_actions(), env.id()),
            ));
        }
        Ok(TrajectoryProducer {
            config,
            policy,
            env: Some(env),
            receiver: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            produced: Arc::new(AtomicUsize::new(0)),
            handle: None,
        })
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Trajectories published so far
    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    /// Trajectories waiting in the queue
    pub fn queued(&self) -> usize {
        self.receiver.as_ref().map_or(0, Receiver::len)
    }

    /// Launch the collection thread. The environment is reset before the
    /// first step.
    pub fn start(&mut self, summaries: Option<EpisodeSummaries>) -> Result<()> {
        let env = self.env.take().ok_or(A3cError::ProducerAlreadyStarted)?;
        let (sender, receiver) = bounded(self.config.queue_capacity);

        let worker = Worker {
            env,
            policy: self.policy.clone(),
            trajectory_length: self.config.trajectory_length,
            rng: match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            stop_flag: Arc::clone(&self.stop_flag),
            produced: Arc::clone(&self.produced),
            summaries,
            episode: EpisodeTracker::default(),
        };

        let handle = thread::Builder::new()
            .name(format!("{}-producer", self.policy.name()))
            .spawn(move || worker.run(sender))?;

        info!(
            trajectory_length = self.config.trajectory_length,
            queue_capacity = self.config.queue_capacity,
            "Started trajectory producer"
        );
        self.receiver = Some(receiver);
        self.handle = Some(handle);
        Ok(())
    }

    /// Block until the next trajectory is available.
    pub fn next(&self) -> Result<Trajectory> {
        let receiver = self.receiver.as_ref().ok_or(A3cError::ProducerStopped)?;
        receiver.recv().map_err(|_| A3cError::ProducerStopped)?
    }

    /// Stop the collection thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        // dropping the receiver wakes a thread blocked on a full queue
        self.receiver = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Trajectory producer thread panicked");
            } else {
                info!(produced = self.produced(), "Stopped trajectory producer");
            }
        }
    }
}

impl Drop for TrajectoryProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct EpisodeTracker {
    reward: f32,
    length: usize,
    count: usize,
    last_report: Option<u64>,
}

struct Worker {
    env: Box<dyn Environment>,
    policy: PolicyHandle,
    trajectory_length: usize,
    rng: StdRng,
    stop_flag: Arc<AtomicBool>,
    produced: Arc<AtomicUsize>,
    summaries: Option<EpisodeSummaries>,
    episode: EpisodeTracker,
}

impl Worker {
    fn run(mut self, sender: Sender<Result<Trajectory>>) {
        let mut observation = match self.env.reset() {
            Ok(obs) => obs,
            Err(e) => {
                let _ = sender.send(Err(e));
                return;
            }
        };
        let mut state = self.policy.policy().initial_state();

        while !self.stop_flag.load(Ordering::SeqCst) {
            let segment = self.collect(&mut observation, &mut state);
            let failed = segment.is_err();
            if sender.send(segment).is_err() {
                // consumer is gone
                break;
            }
            if failed {
                break;
            }
            self.produced.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Collect one segment, cut early at an episode end.
    fn collect(&mut self, observation: &mut Array1<f32>, state: &mut Option<Array1<f32>>) -> Result<Trajectory> {
        let mut builder = TrajectoryBuilder::new(observation.len(), self.trajectory_length, state.clone());

        for _ in 0..self.trajectory_length {
            let output = self
                .policy
                .act(observation.view(), state.as_ref().map(|s| s.view()), &mut self.rng, false)?;
            let step = self.env.step(output.action)?;
            builder.push(observation.view(), output.action, step.reward, step.done)?;
            self.episode.reward += step.reward;
            self.episode.length += 1;

            if step.done {
                self.finish_episode();
                *observation = self.env.reset()?;
                *state = self.policy.policy().initial_state();
                return builder.finish(0.0);
            }
            *observation = step.observation;
            *state = output.next_state;
        }

        let bootstrap_value = self.policy.value(observation.view(), state.as_ref().map(|s| s.view()))?;
        builder.finish(bootstrap_value)
    }

    fn finish_episode(&mut self) {
        self.episode.count += 1;
        debug!(
            episode = self.episode.count,
            reward = self.episode.reward,
            length = self.episode.length,
            "Episode finished"
        );

        if let Some(summaries) = &self.summaries {
            let now = summaries.step.get();
            let due = self
                .episode
                .last_report
                .map_or(true, |last| now.saturating_sub(last) >= summaries.summary_period);
            if due {
                let scalars = [
                    ("episode_reward", self.episode.reward),
                    ("episode_length", self.episode.length as f32),
                ];
                match summaries.sink.write_scalars(&summaries.step, &scalars) {
                    Ok(at) => self.episode.last_report = Some(at),
                    Err(e) => warn!("Failed to write episode summary: {}", e),
                }
            }
        }

        self.episode.reward = 0.0;
        self.episode.length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Corridor;
    use crate::policy::{MlpPolicy, Policy, RecurrentPolicy};
    use std::time::{Duration, Instant};

    fn producer(length: usize, capacity: usize, env: Corridor) -> TrajectoryProducer {
        let policy: Arc<dyn Policy> = Arc::new(MlpPolicy::new(env.observation_size(), 2, &[8]).unwrap());
        let handle = PolicyHandle::new("MlpPolicy_local", policy, &mut StdRng::seed_from_u64(0));
        let config = ProducerConfig {
            trajectory_length: length,
            queue_capacity: capacity,
            seed: Some(1),
        };
        TrajectoryProducer::new(Box::new(env), handle, config).unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_segments_respect_length_and_episode_cut() {
        let mut p = producer(4, 5, Corridor::new(3, 50).unwrap());
        p.start(None).unwrap();
        for _ in 0..20 {
            let traj = p.next().unwrap();
            assert!(traj.num_timesteps >= 1 && traj.num_timesteps <= 4);
            assert_eq!(traj.actions.len(), traj.num_timesteps);
            // a done flag can only appear at the cut
            for &d in &traj.dones[..traj.num_timesteps - 1] {
                assert!(!d);
            }
            if traj.ends_episode() {
                assert_eq!(traj.bootstrap_value, 0.0);
            }
        }
    }

    #[test]
    fn test_recurrent_state_carries_across_segments() {
        let env = Corridor::new(6, 1000).unwrap();
        let policy: Arc<dyn Policy> = Arc::new(RecurrentPolicy::new(env.observation_size(), 2, 8).unwrap());
        let handle = PolicyHandle::new("RecurrentPolicy_local", Arc::clone(&policy), &mut StdRng::seed_from_u64(0));
        let params = handle.parameters();
        let config = ProducerConfig {
            trajectory_length: 3,
            queue_capacity: 5,
            seed: Some(1),
        };
        let mut p = TrajectoryProducer::new(Box::new(env), handle, config).unwrap();
        p.start(None).unwrap();

        let segments: Vec<Trajectory> = (0..30).map(|_| p.next().unwrap()).collect();
        p.stop();
        assert!(segments[0].initial_state.as_ref().unwrap().iter().all(|&x| x == 0.0));

        let mut carried = 0;
        for pair in segments.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            let start = next.initial_state.as_ref().unwrap();
            if previous.ends_episode() {
                assert!(start.iter().all(|&x| x == 0.0));
                continue;
            }
            let pass = policy
                .forward(&params, previous.observations.view(), previous.initial_state.as_ref().map(|s| s.view()))
                .unwrap();
            let expected = pass.final_state.unwrap();
            for (a, b) in start.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-5);
            }
            carried += 1;
        }
        assert!(carried > 0);
    }

    #[test]
    fn test_backpressure_blocks_at_capacity() {
        let mut p = producer(2, 3, Corridor::new(10, 1000).unwrap());
        p.start(None).unwrap();
        assert!(wait_for(|| p.produced() == 3));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(p.produced(), 3);
        assert_eq!(p.queued(), 3);

        p.next().unwrap();
        assert!(wait_for(|| p.produced() == 4));
        assert_eq!(p.queued(), 3);
        p.stop();
        assert!(!p.is_running());
    }

    #[test]
    fn test_start_twice_is_an_error() {
        let mut p = producer(2, 1, Corridor::new(3, 10).unwrap());
        p.start(None).unwrap();
        assert!(matches!(p.start(None), Err(A3cError::ProducerAlreadyStarted)));
    }

    #[test]
    fn test_next_after_stop() {
        let mut p = producer(2, 1, Corridor::new(3, 10).unwrap());
        assert!(matches!(p.next(), Err(A3cError::ProducerStopped)));
        p.start(None).unwrap();
        p.stop();
        assert!(matches!(p.next(), Err(A3cError::ProducerStopped)));
    }
}
