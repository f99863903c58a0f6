//! # Activation Functions Module
//!
//! Element-wise non-linearities used by the policy networks. Every activation
//! works on a minibatch (`Array2`, one row per timestep) because the
//! training core always evaluates a whole trajectory at once.
//!
//! ## Available Activations
//!
//! - **ReLU**: `max(0, x)`
//! - **Tanh**: hyperbolic tangent - hidden layers of the built-in policies and the recurrent cell
//! - **Sigmoid**: `1 / (1 + e^(-x))`
//! - **LeakyReLU**: ReLU with small negative slope
//! - **Linear**: identity, used for the logits and value heads
//!
//! Derivatives are evaluated on the *pre-activation* values cached by the
//! forward pass.

pub mod functions;

pub use functions::Activation;
