use tempfile::tempdir;

use crate::algorithms::{A3CBuilder, A3C};
use crate::checkpoint::{latest_checkpoint, Checkpoint};
use crate::env::{Corridor, Environment, Step};
use crate::error::{A3cError, Result};
use crate::optimizer::OptimizerConfig;
use crate::policy::PolicyKind;
use crate::session::StopSignal;
use crate::summary::read_scalars;
use crate::training::TrainConfig;

fn corridor_a3c(seed: u64) -> A3C {
    A3CBuilder::new()
        .env(Box::new(Corridor::new(5, 12).unwrap()))
        .policy_kind(PolicyKind::Mlp)
        .trajectory_length(8)
        .seed(seed)
        .build()
        .unwrap()
}

fn config(logdir: &std::path::Path, num_steps: u64) -> TrainConfig {
    TrainConfig::default()
        .with_num_steps(num_steps)
        .with_logdir(logdir)
        .with_summary_period(40)
        .with_checkpoint_period(Some(100))
        .with_optimizer(OptimizerConfig::from_name("rmsprop", 7e-4).unwrap())
}

/// Corridor whose simulator crashes on a given step
struct CrashingCorridor {
    inner: Corridor,
    steps: usize,
    crash_at: usize,
}

impl Environment for CrashingCorridor {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn observation_size(&self) -> usize {
        self.inner.observation_size()
    }

    fn num_actions(&self) -> usize {
        self.inner.num_actions()
    }

    fn reset(&mut self) -> Result<ndarray::Array1<f32>> {
        self.inner.reset()
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        self.steps += 1;
        if self.steps == self.crash_at {
            return Err(A3cError::environment("simulator crashed"));
        }
        self.inner.step(action)
    }
}

#[test]
fn test_environment_failure_ends_training_with_error() {
    let dir = tempdir().unwrap();
    let env = CrashingCorridor {
        inner: Corridor::new(6, 1000).unwrap(),
        steps: 0,
        crash_at: 26,
    };
    let mut a3c = A3CBuilder::new()
        .env(Box::new(env))
        .policy_kind(PolicyKind::Mlp)
        .trajectory_length(8)
        .seed(0)
        .build()
        .unwrap();

    let result = a3c.train(&config(dir.path(), 1000).with_checkpoint_period(None));
    match result {
        Err(A3cError::Environment(msg)) => assert!(msg.contains("simulator crashed")),
        other => panic!("expected an environment error, got {:?}", other),
    }
    assert!(a3c.global_step().get() < 26);
}

#[test]
fn test_step_counter_is_sum_of_consumed_timesteps() {
    let dir = tempdir().unwrap();
    let mut a3c = corridor_a3c(0);
    let report = a3c.train(&config(dir.path(), 150)).unwrap();

    let consumed: usize = report.timesteps.iter().sum();
    assert_eq!(report.final_step, consumed as u64);
    assert_eq!(a3c.global_step().get(), report.final_step);
    assert_eq!(report.iterations as usize, report.timesteps.len());
    assert!(report.final_step >= 150);
    assert!(report.final_step < 150 + 8);
    assert!(report.timesteps.iter().all(|&t| t >= 1 && t <= 8));
}

#[test]
fn test_first_iteration_emits_summary() {
    let dir = tempdir().unwrap();
    let mut a3c = corridor_a3c(1);
    let report = a3c.train(&config(dir.path(), 30)).unwrap();
    assert!(report.last_summary.is_some());

    let records = read_scalars(dir.path()).unwrap();
    let policy_losses: Vec<_> = records.iter().filter(|r| r.tag == "policy_loss").collect();
    assert!(!policy_losses.is_empty());
    assert_eq!(policy_losses[0].step, 0);
    assert!(records.windows(2).all(|w| w[0].step <= w[1].step));
}

#[test]
fn test_final_checkpoint_matches_global_policy() {
    let dir = tempdir().unwrap();
    let mut a3c = corridor_a3c(2);
    let report = a3c.train(&config(dir.path(), 120)).unwrap();

    let path = latest_checkpoint(dir.path()).unwrap().unwrap();
    let checkpoint = Checkpoint::load(&path).unwrap();
    assert_eq!(checkpoint.step, report.final_step);
    assert_eq!(
        checkpoint.policy("MlpPolicy_global").unwrap(),
        &a3c.global_policy().parameters()
    );
    assert!(checkpoint.optimizer.is_some());
}

#[test]
fn test_resume_continues_from_saved_step() {
    let dir = tempdir().unwrap();
    let mut first = corridor_a3c(3);
    let first_report = first.train(&config(dir.path(), 60)).unwrap();

    let mut second = corridor_a3c(4);
    let resume = config(dir.path(), 120).with_checkpoint(Some(dir.path()));
    let second_report = second.train(&resume).unwrap();

    assert_eq!(second_report.start_step, first_report.final_step);
    let consumed: usize = second_report.timesteps.iter().sum();
    assert_eq!(second_report.final_step, first_report.final_step + consumed as u64);
}

#[test]
fn test_external_stop_before_first_iteration() {
    let dir = tempdir().unwrap();
    let mut a3c = corridor_a3c(5);
    let stop = StopSignal::new();
    stop.request_stop();
    let report = a3c.train_with(&config(dir.path(), 1000), Vec::new(), stop).unwrap();
    assert_eq!(report.iterations, 0);
    assert_eq!(report.final_step, 0);
    // the saver still leaves a checkpoint behind
    assert!(latest_checkpoint(dir.path()).unwrap().is_some());
}

#[test]
fn test_training_changes_global_parameters_only_through_updates() {
    let dir = tempdir().unwrap();
    let mut a3c = corridor_a3c(6);
    let before = a3c.global_policy().parameters();
    a3c.train(&config(dir.path(), 40)).unwrap();
    let after = a3c.global_policy().parameters();
    assert_ne!(before, after);
    assert!(after.blocks().iter().all(|b| b.weights.iter().all(|w| w.is_finite())));
}
