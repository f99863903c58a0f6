//! Training loop.
//!
//! Each iteration synchronizes the local policy, pulls one trajectory,
//! estimates advantages, computes the joint loss gradients on the local
//! policy and applies them to the global parameters. The global step
//! advances by the number of timesteps consumed, which drives the summary
//! and checkpoint schedules and the step budget.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::algorithms::{UpdateStats, A3C};
use crate::error::{A3cError, Result};
use crate::optimizer::{LearningRateScheduler, OptimizerConfig};
use crate::session::{CheckpointSaverHook, ManagedSession, SessionHook, SessionOptions, StopAtStepHook, StopSignal};
use crate::summary::SummarySink;
use crate::trajectory::EpisodeSummaries;

/// Configuration of one training run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Step budget in environment timesteps
    pub num_steps: u64,
    /// Directory for summaries and checkpoints
    pub logdir: PathBuf,
    /// Steps between summary records
    pub summary_period: u64,
    /// Steps between checkpoints; no checkpoint saver when `None`
    pub checkpoint_period: Option<u64>,
    /// Checkpoint file or directory to restore before training
    pub checkpoint: Option<PathBuf>,
    pub gamma: f32,
    pub lambda: f32,
    pub optimizer: OptimizerConfig,
    /// Learning-rate schedule over the global step; the optimizer's rate when `None`
    pub lr_schedule: Option<LearningRateScheduler>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            num_steps: 1_000_000,
            logdir: PathBuf::from("logs"),
            summary_period: 10_000,
            checkpoint_period: Some(100_000),
            checkpoint: None,
            gamma: 0.99,
            lambda: 0.95,
            optimizer: OptimizerConfig::default(),
            lr_schedule: None,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: TrainConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.summary_period == 0 {
            return Err(A3cError::invalid_parameter("summary_period", "must be positive"));
        }
        if self.checkpoint_period == Some(0) {
            return Err(A3cError::invalid_parameter("checkpoint_period", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(A3cError::invalid_parameter("gamma", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(A3cError::invalid_parameter("lambda", "must be in [0, 1]"));
        }
        if !(self.optimizer.learning_rate() > 0.0) {
            return Err(A3cError::invalid_parameter("learning_rate", "must be positive"));
        }
        Ok(())
    }

    pub fn with_num_steps(mut self, num_steps: u64) -> Self {
        self.num_steps = num_steps;
        self
    }

    pub fn with_logdir<P: Into<PathBuf>>(mut self, logdir: P) -> Self {
        self.logdir = logdir.into();
        self
    }

    pub fn with_summary_period(mut self, period: u64) -> Self {
        self.summary_period = period;
        self
    }

    pub fn with_checkpoint_period(mut self, period: Option<u64>) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub fn with_checkpoint<P: Into<PathBuf>>(mut self, checkpoint: Option<P>) -> Self {
        self.checkpoint = checkpoint.map(Into::into);
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_lr_schedule(mut self, schedule: Option<LearningRateScheduler>) -> Self {
        self.lr_schedule = schedule;
        self
    }

    fn learning_rate(&self, step: u64) -> f32 {
        self.lr_schedule
            .as_ref()
            .map_or_else(|| self.optimizer.learning_rate(), |s| s.get_lr(step))
    }
}

/// Outcome of [`A3C::train`]
#[derive(Clone, Debug, PartialEq)]
pub struct TrainReport {
    pub start_step: u64,
    pub final_step: u64,
    pub iterations: u64,
    /// Timesteps consumed by each iteration, in order
    pub timesteps: Vec<usize>,
    /// Statistics of the most recent summary step
    pub last_summary: Option<UpdateStats>,
}

impl A3C {
    /// Train until the step budget is reached.
    ///
    /// The producer thread is started here and cannot be restarted, so
    /// each `A3C` trains once; resume from a checkpoint with a new one.
    pub fn train(&mut self, config: &TrainConfig) -> Result<TrainReport> {
        self.train_with(config, Vec::new(), StopSignal::new())
    }

    /// Train with extra session hooks and an external stop signal.
    ///
    /// The stop signal is checked once per iteration; an iteration in
    /// progress always completes.
    pub fn train_with(
        &mut self,
        config: &TrainConfig,
        extra_hooks: Vec<Box<dyn SessionHook>>,
        stop: StopSignal,
    ) -> Result<TrainReport> {
        config.validate()?;

        let mut hooks = extra_hooks;
        hooks.push(Box::new(StopAtStepHook::new(config.num_steps)));
        if let Some(period) = config.checkpoint_period {
            hooks.push(Box::new(CheckpointSaverHook::new(&config.logdir, period)));
        }
        let options = SessionOptions {
            restore_from: config.checkpoint.clone(),
            hooks,
            stop,
        };
        let mut session = ManagedSession::open(
            self.global_step().clone(),
            vec![self.global_policy().clone()],
            config.optimizer.build(),
            options,
        )?;
        if self.has_separate_local() {
            self.sync()?;
        }

        let sink = SummarySink::open(&config.logdir)?;
        self.start_producer(Some(EpisodeSummaries {
            sink: sink.clone(),
            step: self.global_step().clone(),
            summary_period: config.summary_period,
        }))?;

        let result = self.run_loop(config, &mut session, &sink);
        self.stop_producer();
        let report = result?;
        sink.flush()?;
        session.close()?;
        info!(step = report.final_step, iterations = report.iterations, "Training finished");
        Ok(report)
    }

    fn run_loop(&self, config: &TrainConfig, session: &mut ManagedSession, sink: &SummarySink) -> Result<TrainReport> {
        let start_step = self.global_step().get();
        info!(step = start_step, name = self.name(), "Starting training");

        let mut report = TrainReport {
            start_step,
            final_step: start_step,
            iterations: 0,
            timesteps: Vec::new(),
            last_summary: None,
        };
        // the first iteration always writes a summary
        let mut last_summary_step: Option<u64> = None;

        while !session.should_stop() && self.global_step().get() < config.num_steps {
            if self.has_separate_local() {
                self.sync()?;
            }
            let trajectory = self.next_trajectory()?;
            let feed = self.feed(trajectory, config.gamma, config.lambda)?;

            let step = self.global_step().get();
            let summary_due = last_summary_step.map_or(true, |last| step - last >= config.summary_period);
            let learning_rate = config.learning_rate(step);

            let mut output = self.compute_gradients(&feed)?;
            let gradient_norm = self.apply_gradients(&mut output.gradients, session.optimizer_mut(), learning_rate)?;

            if summary_due {
                let stats = self.update_stats(&feed, &output.terms, gradient_norm);
                info!("Step #{} Policy loss: {}, Value Loss: {}", step, stats.policy_loss, stats.value_loss);
                let mut scalars = stats.scalars().to_vec();
                scalars.push(("learning_rate", learning_rate));
                sink.write_with_histograms(
                    self.global_step(),
                    &scalars,
                    &[("advantages", feed.advantages.view()), ("value_targets", feed.value_targets.view())],
                )?;
                report.last_summary = Some(stats);
                last_summary_step = Some(step);
            }

            let consumed = feed.num_timesteps();
            report.final_step = self.global_step().advance(consumed as u64);
            report.iterations += 1;
            report.timesteps.push(consumed);
            session.after_step()?;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TrainConfig::default();
        assert_eq!(config.gamma, 0.99);
        assert_eq!(config.lambda, 0.95);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(TrainConfig::default().with_gamma(1.5).validate().is_err());
        assert!(TrainConfig::default().with_lambda(-0.1).validate().is_err());
        assert!(TrainConfig::default().with_summary_period(0).validate().is_err());
        assert!(TrainConfig::default().with_checkpoint_period(Some(0)).validate().is_err());
        assert!(TrainConfig::default()
            .with_optimizer(OptimizerConfig::Sgd { learning_rate: 0.0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(
            &path,
            r#"{"num_steps": 500, "gamma": 0.9, "optimizer": {"type": "rms_prop", "learning_rate": 0.0007, "decay": 0.99, "epsilon": 1e-5}}"#,
        )
        .unwrap();
        let config = TrainConfig::from_json_file(&path).unwrap();
        assert_eq!(config.num_steps, 500);
        assert_eq!(config.gamma, 0.9);
        assert_eq!(config.lambda, 0.95);
        assert!(matches!(config.optimizer, OptimizerConfig::RmsProp { .. }));
    }

    #[test]
    fn test_schedule_overrides_optimizer_rate() {
        let config = TrainConfig::default().with_lr_schedule(Some(LearningRateScheduler::linear_to_zero(1.0, 100)));
        assert_eq!(config.learning_rate(50), 0.5);
        assert_eq!(TrainConfig::default().learning_rate(50), 1e-4);
    }
}
