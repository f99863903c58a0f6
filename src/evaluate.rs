//! Policy evaluation without learning.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkpoint::Checkpoint;
use crate::env::{Environment, RecordingEnv};
use crate::error::{A3cError, Result};
use crate::metrics::{RunningStats, Statistics};
use crate::policy::{PolicyHandle, PolicyKind};

/// Episodes over which mean and std are reported
const REPORT_MIN_EPISODES: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub num_episodes: usize,
    pub render: bool,
    /// Directory receiving one record per finished episode
    pub record: Option<PathBuf>,
    pub seed: Option<u64>,
    /// Take the most likely action instead of sampling
    pub deterministic: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            num_episodes: 1,
            render: false,
            record: None,
            seed: None,
            deterministic: false,
        }
    }
}

impl EvaluationConfig {
    pub fn with_num_episodes(mut self, num_episodes: usize) -> Self {
        self.num_episodes = num_episodes;
        self
    }

    pub fn with_render(mut self, render: bool) -> Self {
        self.render = render;
        self
    }

    pub fn with_record<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.record = dir.map(Into::into);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationReport {
    pub episode_rewards: Vec<f32>,
    pub episode_lengths: Vec<usize>,
    /// Running mean after the last episode
    pub mean_reward: f32,
    pub statistics: Statistics,
}

/// Restore `name` from a checkpoint file or directory as a policy of `kind`
/// sized for `env`.
pub fn load_policy<P: AsRef<Path>>(
    checkpoint: P,
    kind: PolicyKind,
    name: &str,
    env: &dyn Environment,
) -> Result<PolicyHandle> {
    let checkpoint = Checkpoint::load(checkpoint)?;
    let policy = kind.build(env.observation_size(), env.num_actions())?;
    let params = checkpoint.policy(name)?.clone();
    let handle = PolicyHandle::from_parameters(name, policy, params)
        .map_err(|e| A3cError::Checkpoint(format!("'{}' does not fit a {} policy for {}: {}", name, kind, env.id(), e)))?;
    info!(name, step = checkpoint.step, "Loaded policy");
    Ok(handle)
}

/// Roll out `config.num_episodes` full episodes with `policy`.
pub fn evaluate(env: Box<dyn Environment>, policy: &PolicyHandle, config: &EvaluationConfig) -> Result<EvaluationReport> {
    if config.num_episodes == 0 {
        return Err(A3cError::invalid_parameter("num_episodes", "must be positive"));
    }
    let mut env: Box<dyn Environment> = match &config.record {
        Some(dir) => Box::new(RecordingEnv::new(env, dir)?),
        None => env,
    };
    let mut rng = match config.seed {
        Some(seed) => {
            env.seed(seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    };

    let mut rewards = Vec::with_capacity(config.num_episodes);
    let mut lengths = Vec::with_capacity(config.num_episodes);
    let mut running = RunningStats::new();

    for episode in 0..config.num_episodes {
        let mut observation = env.reset()?;
        let mut state = policy.policy().initial_state();
        let mut total_reward = 0.0f32;
        let mut length = 0usize;
        if config.render {
            env.render()?;
        }

        loop {
            let output = policy.act(observation.view(), state.as_ref().map(|s| s.view()), &mut rng, config.deterministic)?;
            let step = env.step(output.action)?;
            if config.render {
                env.render()?;
            }
            total_reward += step.reward;
            length += 1;
            state = output.next_state;
            observation = step.observation;
            if step.done {
                break;
            }
        }

        running.update(total_reward);
        info!("Episode #{} reward: {}, running mean: {}", episode + 1, total_reward, running.mean());
        rewards.push(total_reward);
        lengths.push(length);
    }

    let statistics = running.to_statistics();
    if rewards.len() > REPORT_MIN_EPISODES {
        println!("Mean reward: {:.3} +/- {:.3}", statistics.mean, statistics.std);
    }

    Ok(EvaluationReport {
        episode_rewards: rewards,
        episode_lengths: lengths,
        mean_reward: running.mean(),
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSaver;
    use crate::env::{read_recording, Corridor};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn corridor_policy(seed: u64) -> PolicyHandle {
        let policy = PolicyKind::Mlp.build(5, 2).unwrap();
        PolicyHandle::new("MlpPolicy_global", policy, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_rejects_zero_episodes() {
        let env = Box::new(Corridor::new(5, 20).unwrap());
        let config = EvaluationConfig::default().with_num_episodes(0);
        assert!(evaluate(env, &corridor_policy(0), &config).is_err());
    }

    #[test]
    fn test_running_mean_matches_statistics() {
        let policy = corridor_policy(1);
        let config = EvaluationConfig::default().with_num_episodes(7).with_seed(Some(3));
        let report = evaluate(Box::new(Corridor::new(5, 20).unwrap()), &policy, &config).unwrap();
        assert_eq!(report.episode_rewards.len(), 7);
        let batch = Statistics::from_slice(&report.episode_rewards);
        assert!((report.mean_reward - batch.mean).abs() < 1e-5);
        assert!((report.statistics.std - batch.std).abs() < 1e-5);
        assert_eq!(report.statistics.count, 7);
        assert!(report.episode_lengths.iter().all(|&l| l >= 1 && l <= 20));
    }

    #[test]
    fn test_episodes_are_numbered_from_one() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::clone(&buffer);
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || LogCapture(Arc::clone(&writer)))
            .with_ansi(false)
            .finish();
        let config = EvaluationConfig::default().with_num_episodes(2).with_seed(Some(0));
        tracing::subscriber::with_default(subscriber, || {
            evaluate(Box::new(Corridor::new(5, 20).unwrap()), &corridor_policy(5), &config).unwrap();
        });

        let logs = String::from_utf8(buffer.lock().clone()).unwrap();
        assert!(logs.contains("Episode #1 reward"));
        assert!(logs.contains("Episode #2 reward"));
        assert!(!logs.contains("Episode #0 reward"));
    }

    #[test]
    fn test_same_seed_same_rewards() {
        let policy = corridor_policy(2);
        let config = EvaluationConfig::default().with_num_episodes(4).with_seed(Some(11));
        let a = evaluate(Box::new(Corridor::new(5, 20).unwrap()), &policy, &config).unwrap();
        let b = evaluate(Box::new(Corridor::new(5, 20).unwrap()), &policy, &config).unwrap();
        assert_eq!(a.episode_rewards, b.episode_rewards);
        assert_eq!(a.episode_lengths, b.episode_lengths);
    }

    #[test]
    fn test_recording_writes_each_episode() {
        let dir = tempdir().unwrap();
        let config = EvaluationConfig::default()
            .with_num_episodes(3)
            .with_seed(Some(5))
            .with_record(Some(dir.path()));
        let report = evaluate(Box::new(Corridor::new(5, 20).unwrap()), &corridor_policy(3), &config).unwrap();
        let records = read_recording(dir.path()).unwrap();
        assert_eq!(records.len(), 3);
        for (record, length) in records.iter().zip(&report.episode_lengths) {
            assert_eq!(record.length, *length);
            assert_eq!(record.env_id, "Corridor-v0");
        }
    }

    #[test]
    fn test_load_policy_from_checkpoint() {
        let dir = tempdir().unwrap();
        let saved = corridor_policy(4);
        CheckpointSaver::new(dir.path())
            .save(&Checkpoint::capture(77, &[saved.clone()], None))
            .unwrap();

        let env = Corridor::new(5, 20).unwrap();
        let loaded = load_policy(dir.path(), PolicyKind::Mlp, "MlpPolicy_global", &env).unwrap();
        assert_eq!(loaded.parameters(), saved.parameters());

        assert!(load_policy(dir.path(), PolicyKind::Mlp, "other", &env).is_err());
        assert!(load_policy(dir.path(), PolicyKind::Recurrent, "MlpPolicy_global", &env).is_err());
    }
}
