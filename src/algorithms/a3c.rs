use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::distribution::Categorical;
use crate::env::Environment;
use crate::error::{A3cError, Result};
use crate::global_step::GlobalStep;
use crate::optimizer::OptimizerWrapper;
use crate::params::{Gradients, Parameters};
use crate::policy::{ForwardPass, PolicyHandle, PolicyKind};
use crate::trajectory::producer::DEFAULT_QUEUE_CAPACITY;
use crate::trajectory::{gae, EpisodeSummaries, ProducerConfig, Trajectory, TrajectoryProducer};

/// Construction-time parameters of [`A3C`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct A3CConfig {
    /// Maximum number of timesteps per trajectory
    pub trajectory_length: usize,
    /// Trajectories the producer may queue ahead of the trainer
    pub queue_capacity: usize,
    pub entropy_coef: f32,
    pub value_loss_coef: f32,
    pub name: String,
    /// Seed for parameter initialization and action sampling
    pub seed: Option<u64>,
}

impl Default for A3CConfig {
    fn default() -> Self {
        A3CConfig {
            trajectory_length: 20,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            entropy_coef: 0.01,
            value_loss_coef: 0.25,
            name: "A3C".to_string(),
            seed: None,
        }
    }
}

impl A3CConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trajectory_length == 0 {
            return Err(A3cError::invalid_parameter("trajectory_length", "must be positive"));
        }
        if self.queue_capacity == 0 {
            return Err(A3cError::invalid_parameter("queue_capacity", "must be positive"));
        }
        if !self.entropy_coef.is_finite() || !self.value_loss_coef.is_finite() || self.value_loss_coef < 0.0 {
            return Err(A3cError::invalid_parameter(
                "loss coefficients",
                "entropy_coef must be finite and value_loss_coef finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// One trajectory prepared for the loss: the local policy's forward pass
/// over its observations plus advantages and value targets.
#[derive(Clone, Debug)]
pub struct Feed {
    pub trajectory: Trajectory,
    /// Local parameters the forward pass was computed with
    pub params: Parameters,
    pub pass: ForwardPass,
    pub advantages: Array1<f32>,
    pub value_targets: Array1<f32>,
}

impl Feed {
    pub fn num_timesteps(&self) -> usize {
        self.trajectory.num_timesteps
    }
}

/// Scalar terms of the joint objective, summed over the batch
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossTerms {
    /// `Σ -log π(a|s)·A - entropy_coef·Σ H`
    pub policy_loss: f32,
    /// `Σ (V - target)²`
    pub value_loss: f32,
    /// `policy_loss + value_loss_coef·value_loss`
    pub loss: f32,
    /// `Σ H`
    pub entropy: f32,
}

/// Loss terms and gradients wrt the local parameters
#[derive(Clone, Debug)]
pub struct LossOutput {
    pub terms: LossTerms,
    pub gradients: Gradients,
}

/// Scalars reported on summary steps
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpdateStats {
    pub batch_size: usize,
    pub value_preds: f32,
    pub value_targets: f32,
    pub distribution_entropy: f32,
    pub policy_loss: f32,
    pub value_loss: f32,
    pub loss: f32,
    pub gradient_norm: f32,
    pub policy_norm: f32,
}

impl UpdateStats {
    pub fn scalars(&self) -> [(&'static str, f32); 8] {
        [
            ("value_preds", self.value_preds),
            ("value_targets", self.value_targets),
            ("distribution_entropy", self.distribution_entropy),
            ("policy_loss", self.policy_loss),
            ("value_loss", self.value_loss),
            ("loss", self.loss),
            ("gradient_norm", self.gradient_norm),
            ("policy_norm", self.policy_norm),
        ]
    }
}

/// The joint A3C objective for one batch.
///
/// Advantages and value targets are constants. Returns the loss terms,
/// dLoss/dLogits and dLoss/dValues.
pub fn joint_loss(
    logits: &Array2<f32>,
    values: ArrayView1<f32>,
    actions: &[usize],
    advantages: ArrayView1<f32>,
    value_targets: ArrayView1<f32>,
    entropy_coef: f32,
    value_loss_coef: f32,
) -> Result<(LossTerms, Array2<f32>, Array1<f32>)> {
    let n = actions.len();
    if values.len() != n || advantages.len() != n || value_targets.len() != n || logits.nrows() != n {
        return Err(A3cError::dimension_mismatch(
            format!("batch of {}", n),
            format!(
                "{} logits, {} values, {} advantages, {} targets",
                logits.nrows(),
                values.len(),
                advantages.len(),
                value_targets.len()
            ),
        ));
    }

    let dist = Categorical::new(logits);
    let neglogp = dist.neglogp(actions)?;
    let entropy = dist.entropy().sum();
    let policy_loss = (&neglogp * &advantages).sum() - entropy_coef * entropy;

    let errors = &values - &value_targets;
    let value_loss = errors.mapv(|e| e * e).sum();
    let loss = policy_loss + value_loss_coef * value_loss;

    let mut logits_grad = dist.neglogp_grad(actions, advantages)?;
    logits_grad.scaled_add(-entropy_coef, &dist.entropy_grad());
    let values_grad = errors.mapv(|e| 2.0 * value_loss_coef * e);

    let terms = LossTerms {
        policy_loss,
        value_loss,
        loss,
        entropy,
    };
    Ok((terms, logits_grad, values_grad))
}

/// Asynchronous advantage actor-critic over one environment.
///
/// Owns the global/local policy pair, the trajectory producer and the
/// global step. Without a separate local policy both handles alias the
/// same parameter store and [`A3C::sync`] does nothing.
pub struct A3C {
    config: A3CConfig,
    global_policy: PolicyHandle,
    local_policy: PolicyHandle,
    producer: TrajectoryProducer,
    global_step: GlobalStep,
}

impl A3C {
    pub fn new(
        env: Box<dyn Environment>,
        global_policy: PolicyHandle,
        local_policy: Option<PolicyHandle>,
        config: A3CConfig,
    ) -> Result<Self> {
        config.validate()?;
        let local_policy = local_policy.unwrap_or_else(|| global_policy.clone());
        if !local_policy.shares_parameters(&global_policy) {
            global_policy.parameters().check_compatible(&local_policy.parameters())?;
        }

        let producer = TrajectoryProducer::new(
            env,
            local_policy.clone(),
            ProducerConfig {
                trajectory_length: config.trajectory_length,
                queue_capacity: config.queue_capacity,
                seed: config.seed,
            },
        )?;

        info!(
            name = %config.name,
            global = global_policy.name(),
            local = local_policy.name(),
            policy = global_policy.policy().type_name(),
            "Created A3C"
        );
        Ok(A3C {
            config,
            global_policy,
            local_policy,
            producer,
            global_step: GlobalStep::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &A3CConfig {
        &self.config
    }

    pub fn global_policy(&self) -> &PolicyHandle {
        &self.global_policy
    }

    pub fn local_policy(&self) -> &PolicyHandle {
        &self.local_policy
    }

    pub fn has_separate_local(&self) -> bool {
        !self.local_policy.shares_parameters(&self.global_policy)
    }

    pub fn global_step(&self) -> &GlobalStep {
        &self.global_step
    }

    pub fn producer(&self) -> &TrajectoryProducer {
        &self.producer
    }

    /// Copy every global parameter into the local policy as one atomic step.
    pub fn sync(&self) -> Result<()> {
        self.local_policy.store().sync_from(self.global_policy.store())
    }

    pub fn start_producer(&mut self, summaries: Option<EpisodeSummaries>) -> Result<()> {
        self.producer.start(summaries)
    }

    pub fn stop_producer(&mut self) {
        self.producer.stop();
    }

    /// Block until the producer publishes the next trajectory.
    pub fn next_trajectory(&self) -> Result<Trajectory> {
        self.producer.next()
    }

    /// Evaluate the local policy over `trajectory` and estimate advantages.
    pub fn feed(&self, trajectory: Trajectory, gamma: f32, lambda: f32) -> Result<Feed> {
        if trajectory.is_empty() {
            return Err(A3cError::EmptyTrajectory);
        }
        let params = self.local_policy.parameters();
        let pass = self.local_policy.policy().forward(
            &params,
            trajectory.observations.view(),
            trajectory.initial_state.as_ref().map(|s| s.view()),
        )?;
        let estimate = gae(
            trajectory.rewards.view(),
            pass.values.view(),
            &trajectory.dones,
            trajectory.bootstrap_value,
            gamma,
            lambda,
        )?;
        Ok(Feed {
            trajectory,
            params,
            pass,
            advantages: estimate.advantages,
            value_targets: estimate.value_targets,
        })
    }

    /// Joint loss of a feed and its gradients wrt the local parameters.
    pub fn compute_gradients(&self, feed: &Feed) -> Result<LossOutput> {
        let (terms, logits_grad, values_grad) = joint_loss(
            &feed.pass.logits,
            feed.pass.values.view(),
            &feed.trajectory.actions,
            feed.advantages.view(),
            feed.value_targets.view(),
            self.config.entropy_coef,
            self.config.value_loss_coef,
        )?;
        let gradients =
            self.local_policy
                .policy()
                .backward(&feed.params, &feed.pass, logits_grad.view(), values_grad.view())?;
        if !gradients.is_finite() {
            return Err(A3cError::Numerical(format!(
                "non-finite gradients (loss {}, policy loss {}, value loss {})",
                terms.loss, terms.policy_loss, terms.value_loss
            )));
        }
        Ok(LossOutput { terms, gradients })
    }

    /// Preprocess gradients with the global policy's hook and apply them to
    /// the global parameters. Returns the global norm of the raw gradients.
    pub fn apply_gradients(
        &self,
        gradients: &mut Gradients,
        optimizer: &mut OptimizerWrapper,
        learning_rate: f32,
    ) -> Result<f32> {
        let raw_norm = self.global_policy.policy().preprocess_gradients(gradients);
        self.global_policy.store().apply_gradients(gradients, optimizer, learning_rate)?;
        debug!(gradient_norm = raw_norm, learning_rate, "Applied gradients");
        Ok(raw_norm)
    }

    /// Summary scalars of one update; losses are divided by the batch size.
    pub fn update_stats(&self, feed: &Feed, terms: &LossTerms, gradient_norm: f32) -> UpdateStats {
        let batch = feed.num_timesteps().max(1) as f32;
        UpdateStats {
            batch_size: feed.num_timesteps(),
            value_preds: feed.pass.values.sum() / batch,
            value_targets: feed.value_targets.sum() / batch,
            distribution_entropy: terms.entropy / batch,
            policy_loss: terms.policy_loss / batch,
            value_loss: terms.value_loss / batch,
            loss: terms.loss / batch,
            gradient_norm,
            policy_norm: feed.params.global_norm(),
        }
    }
}

/// Builder for [`A3C`]
pub struct A3CBuilder {
    env: Option<Box<dyn Environment>>,
    global_policy: Option<PolicyHandle>,
    local_policy: Option<PolicyHandle>,
    policy_kind: Option<PolicyKind>,
    policy_name: Option<String>,
    separate_local: bool,
    config: A3CConfig,
}

impl A3CBuilder {
    pub fn new() -> Self {
        A3CBuilder {
            env: None,
            global_policy: None,
            local_policy: None,
            policy_kind: None,
            policy_name: None,
            separate_local: true,
            config: A3CConfig::default(),
        }
    }

    pub fn env(mut self, env: Box<dyn Environment>) -> Self {
        self.env = Some(env);
        self
    }

    /// Use an existing global policy.
    pub fn global_policy(mut self, policy: PolicyHandle) -> Self {
        self.global_policy = Some(policy);
        self
    }

    /// Use an existing local policy; without one the global policy acts directly.
    pub fn local_policy(mut self, policy: PolicyHandle) -> Self {
        self.local_policy = Some(policy);
        self
    }

    /// Build the default architecture of `kind` for the environment.
    pub fn policy_kind(mut self, kind: PolicyKind) -> Self {
        self.policy_kind = Some(kind);
        self
    }

    /// Name of the global policy built from `policy_kind`
    pub fn policy_name<S: Into<String>>(mut self, name: S) -> Self {
        self.policy_name = Some(name.into());
        self
    }

    /// Whether a policy built from `policy_kind` gets its own local copy
    pub fn separate_local(mut self, separate: bool) -> Self {
        self.separate_local = separate;
        self
    }

    pub fn config(mut self, config: A3CConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trajectory_length(mut self, length: usize) -> Self {
        self.config.trajectory_length = length;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn entropy_coef(mut self, coef: f32) -> Self {
        self.config.entropy_coef = coef;
        self
    }

    pub fn value_loss_coef(mut self, coef: f32) -> Self {
        self.config.value_loss_coef = coef;
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<A3C> {
        let env = self.env.ok_or_else(|| A3cError::InvalidParameter {
            name: "env".to_string(),
            reason: "Environment not specified".to_string(),
        })?;

        let (global, local) = match (self.global_policy, self.policy_kind) {
            (Some(global), _) => (global, self.local_policy),
            (None, Some(kind)) => {
                let architecture = kind.build(env.observation_size(), env.num_actions())?;
                let mut rng = match self.config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                let name = self.policy_name.unwrap_or_else(|| kind.default_global_name());
                let global = PolicyHandle::new(name, architecture, &mut rng);
                let local = if self.separate_local {
                    Some(global.local_copy(kind.default_local_name()))
                } else {
                    None
                };
                (global, local)
            }
            (None, None) => {
                return Err(A3cError::InvalidParameter {
                    name: "policy".to_string(),
                    reason: "Neither a global policy nor a policy kind specified".to_string(),
                })
            }
        };

        A3C::new(env, global, local, self.config)
    }
}

impl Default for A3CBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Corridor;
    use crate::optimizer::Sgd;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};

    fn build(separate: bool) -> A3C {
        A3CBuilder::new()
            .env(Box::new(Corridor::new(4, 20).unwrap()))
            .policy_kind(PolicyKind::Mlp)
            .separate_local(separate)
            .trajectory_length(5)
            .seed(7)
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = A3CConfig::default();
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.entropy_coef, 0.01);
        assert_eq!(config.value_loss_coef, 0.25);
        assert_eq!(config.name, "A3C");
    }

    #[test]
    fn test_builder_requires_env_and_policy() {
        assert!(A3CBuilder::new().policy_kind(PolicyKind::Mlp).build().is_err());
        assert!(A3CBuilder::new().env(Box::new(Corridor::new(4, 20).unwrap())).build().is_err());
        assert!(A3CBuilder::new()
            .env(Box::new(Corridor::new(4, 20).unwrap()))
            .policy_kind(PolicyKind::Mlp)
            .trajectory_length(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_joint_loss_values() {
        // uniform two-action policy
        let logits = Array2::zeros((2, 2));
        let (terms, _, values_grad) = joint_loss(
            &logits,
            arr1(&[1.0, 0.0]).view(),
            &[0, 1],
            arr1(&[2.0, -1.0]).view(),
            arr1(&[0.5, 1.0]).view(),
            0.1,
            0.5,
        )
        .unwrap();
        let ln2 = 2.0f32.ln();
        assert_abs_diff_eq!(terms.entropy, 2.0 * ln2, epsilon = 1e-6);
        assert_abs_diff_eq!(terms.policy_loss, ln2 * (2.0 - 1.0) - 0.1 * 2.0 * ln2, epsilon = 1e-6);
        assert_abs_diff_eq!(terms.value_loss, 0.25 + 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(terms.loss, terms.policy_loss + 0.5 * 1.25, epsilon = 1e-6);
        assert_abs_diff_eq!(values_grad[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(values_grad[1], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_joint_loss_logits_gradient() {
        let logits = arr2(&[[0.2, -0.4, 0.9], [1.0, 0.0, -1.0]]);
        let values = arr1(&[0.3, -0.2]);
        let actions = [1usize, 2];
        let adv = arr1(&[0.7, -1.3]);
        let targets = arr1(&[1.0, 0.5]);
        let loss = |l: &Array2<f32>| {
            joint_loss(l, values.view(), &actions, adv.view(), targets.view(), 0.05, 0.25)
                .unwrap()
                .0
                .loss
        };
        let (_, grad, _) = joint_loss(&logits, values.view(), &actions, adv.view(), targets.view(), 0.05, 0.25).unwrap();
        let eps = 1e-3;
        for t in 0..2 {
            for a in 0..3 {
                let mut p = logits.clone();
                p[[t, a]] += eps;
                let mut m = logits.clone();
                m[[t, a]] -= eps;
                assert_abs_diff_eq!((loss(&p) - loss(&m)) / (2.0 * eps), grad[[t, a]], epsilon = 1e-2);
            }
        }
    }

    #[test]
    fn test_entropy_bonus_lowers_loss() {
        let logits = Array2::zeros((1, 3));
        let v = arr1(&[0.0]);
        let without = joint_loss(&logits, v.view(), &[0], v.view(), v.view(), 0.0, 0.25).unwrap().0;
        let with = joint_loss(&logits, v.view(), &[0], v.view(), v.view(), 0.01, 0.25).unwrap().0;
        assert!(with.loss < without.loss);
    }

    #[test]
    fn test_sync_copies_global_into_local() {
        let a3c = build(true);
        assert!(a3c.has_separate_local());
        let mut grads = Gradients::zeros_like(&a3c.global_policy().parameters());
        for block in grads.blocks_mut() {
            block.biases.fill(1.0);
        }
        let mut opt = OptimizerWrapper::Sgd(Sgd::new());
        a3c.apply_gradients(&mut grads, &mut opt, 0.1).unwrap();
        assert_ne!(a3c.local_policy().parameters(), a3c.global_policy().parameters());

        a3c.sync().unwrap();
        assert_eq!(a3c.local_policy().parameters(), a3c.global_policy().parameters());
    }

    #[test]
    fn test_sync_without_local_is_noop() {
        let a3c = build(false);
        assert!(!a3c.has_separate_local());
        let before = a3c.global_policy().parameters();
        a3c.sync().unwrap();
        assert_eq!(a3c.global_policy().parameters(), before);
    }

    #[test]
    fn test_feed_and_gradients_shapes() {
        let mut a3c = build(true);
        a3c.start_producer(None).unwrap();
        let traj = a3c.next_trajectory().unwrap();
        let n = traj.num_timesteps;
        let feed = a3c.feed(traj, 0.99, 0.95).unwrap();
        assert_eq!(feed.advantages.len(), n);
        assert_eq!(feed.pass.logits.nrows(), n);
        let out = a3c.compute_gradients(&feed).unwrap();
        assert_eq!(out.gradients.len(), a3c.local_policy().parameters().len());
        let stats = a3c.update_stats(&feed, &out.terms, out.gradients.global_norm());
        assert_eq!(stats.batch_size, n);
        assert_abs_diff_eq!(stats.loss * n as f32, out.terms.loss, epsilon = 1e-4);
        a3c.stop_producer();
    }
}
