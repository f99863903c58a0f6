//! # Algorithms
//!
//! - **A3C (Asynchronous Advantage Actor-Critic)**: a background producer
//!   collects trajectories with a local policy; the trainer computes
//!   generalized advantage estimates, the joint policy/entropy/value loss and
//!   its gradients on the local policy, and applies them to the global
//!   parameters, re-synchronizing the local copy every iteration.
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
//!     .trajectory_length(20)
//!     .build()
//!     .unwrap();
//! let report = a3c.train(&TrainConfig::default().with_num_steps(100_000)).unwrap();
//! println!("stopped at step {}", report.final_step);
//! ```

pub mod a3c;

pub use a3c::{joint_loss, A3CBuilder, A3CConfig, Feed, LossOutput, LossTerms, UpdateStats, A3C};
