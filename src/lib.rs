//! # a3c - Asynchronous Advantage Actor-Critic training core
//!
//! A background producer collects trajectories with a local policy and feeds
//! them through a bounded queue to the training loop, which estimates
//! generalized advantages, computes the joint policy/entropy/value loss and
//! applies its gradients to a shared global parameter store. Training runs
//! inside a managed session that restores and saves checkpoints and emits
//! step-keyed summaries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3c::algorithms::A3CBuilder;
//! use a3c::env::make_env;
//! use a3c::policy::PolicyKind;
//! use a3c::training::TrainConfig;
//!
//! let mut a3c = A3CBuilder::new()
//!     .env(make_env("CartPole-v1").unwrap())
//!     .policy_kind(PolicyKind::Mlp)
//!     .seed(0)
//!     .build()
//!     .unwrap();
//!
//! let config = TrainConfig::default()
//!     .with_num_steps(200_000)
//!     .with_logdir("logs/cartpole");
//! let report = a3c.train(&config).unwrap();
//! println!("trained for {} steps", report.final_step);
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions used by the policy networks
//! - [`algorithms`] - The A3C algorithm core (sync, feed, joint loss, apply)
//! - [`checkpoint`] - Checkpoint files, pointer file and retention
//! - [`distribution`] - Categorical action distribution
//! - [`env`] - Environment contract, built-in simulators and registry
//! - [`error`] - Error types and result handling
//! - [`evaluate`] - Policy roll-outs without learning
//! - [`global_step`] - Shared step counter in environment timesteps
//! - [`layers`] - Dense layers and weight initialization
//! - [`metrics`] - Reward statistics
//! - [`network`] - Feed-forward networks over external parameters
//! - [`optimizer`] - Optimizers, gradient clipping and learning-rate schedules
//! - [`params`] - Parameter sets, gradients and the shared parameter store
//! - [`policy`] - Actor-critic policies and the policy registry
//! - [`session`] - Managed session and its hooks
//! - [`summary`] - Append-only scalar and histogram summaries
//! - [`training`] - Training configuration and loop
//! - [`trajectory`] - Trajectories, the producer thread and GAE

pub mod activations;
pub mod algorithms;
pub mod checkpoint;
pub mod distribution;
pub mod env;
pub mod error;
pub mod evaluate;
pub mod global_step;
pub mod layers;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod params;
pub mod policy;
pub mod session;
pub mod summary;
pub mod training;
pub mod trajectory;

#[cfg(test)]
mod tests;
