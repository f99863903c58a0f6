//! # Optimizers
//!
//! Optimizers mutate a list of [`DenseParams`] blocks given a gradient list of
//! the same layout. Stateful optimizers keep one moment slot per block,
//! indexed by the block's position, created lazily on the first update.
//!
//! Optimizers are only ever driven through
//! [`ParameterStore::apply_gradients`](crate::params::ParameterStore::apply_gradients),
//! which holds the store's write lock for the whole step.

pub mod gradient_clipper;
pub mod lr_scheduler;

use ndarray::{Array1, Array2};
use serde::{Serialize, Deserialize};

use crate::error::{A3cError, Result};
use crate::params::DenseParams;

pub use gradient_clipper::GradientClipper;
pub use lr_scheduler::LearningRateScheduler;

pub trait Optimizer {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32);
    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32);

    /// Called once before the blocks of one step are updated.
    fn begin_step(&mut self, _params: &[DenseParams]) {}

    /// Apply one full step; `gradients[i]` updates `params[i]`.
    fn apply_gradients(&mut self, params: &mut [DenseParams], gradients: &[DenseParams], learning_rate: f32) {
        self.begin_step(params);
        for (slot, (block, grad)) in params.iter_mut().zip(gradients).enumerate() {
            self.update_weights(slot, &mut block.weights, &grad.weights, learning_rate);
            self.update_biases(slot, &mut block.biases, &grad.biases, learning_rate);
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    Sgd(Sgd),
    Adam(Adam),
    RmsProp(RmsProp),
}

impl Optimizer for OptimizerWrapper {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
        }
    }

    fn begin_step(&mut self, params: &[DenseParams]) {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.begin_step(params),
            OptimizerWrapper::Adam(optimizer) => optimizer.begin_step(params),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.begin_step(params),
        }
    }
}

impl OptimizerWrapper {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerWrapper::Sgd(_) => "sgd",
            OptimizerWrapper::Adam(_) => "adam",
            OptimizerWrapper::RmsProp(_) => "rmsprop",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Sgd;

impl Sgd {
    pub fn new() -> Sgd {
        Sgd
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for Sgd {
    fn update_weights(&mut self, _slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
    }

    fn update_biases(&mut self, _slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * g);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    m: Vec<DenseParams>,
    v: Vec<DenseParams>,
    pub t: u64,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            m: Vec::new(),
            v: Vec::new(),
            t: 0,
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self, params: &[DenseParams]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(DenseParams::zeros_like).collect();
            self.v = params.iter().map(DenseParams::zeros_like).collect();
        }
        self.t += 1;
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - b1.powi(self.t as i32);
        let bias2 = 1.0 - b2.powi(self.t as i32);
        let m = &mut self.m[slot].weights;
        let v = &mut self.v[slot].weights;

        m.zip_mut_with(gradients, |m, &g| *m = b1 * *m + (1.0 - b1) * g);
        v.zip_mut_with(gradients, |v, &g| *v = b2 * *v + (1.0 - b2) * g * g);

        ndarray::Zip::from(weights).and(&*m).and(&*v).for_each(|w, &m, &v| {
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            *w -= learning_rate * m_hat / (v_hat.sqrt() + eps);
        });
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let bias1 = 1.0 - b1.powi(self.t as i32);
        let bias2 = 1.0 - b2.powi(self.t as i32);
        let m = &mut self.m[slot].biases;
        let v = &mut self.v[slot].biases;

        m.zip_mut_with(gradients, |m, &g| *m = b1 * *m + (1.0 - b1) * g);
        v.zip_mut_with(gradients, |v, &g| *v = b2 * *v + (1.0 - b2) * g * g);

        ndarray::Zip::from(biases).and(&*m).and(&*v).for_each(|b, &m, &v| {
            let m_hat = m / bias1;
            let v_hat = v / bias2;
            *b -= learning_rate * m_hat / (v_hat.sqrt() + eps);
        });
    }
}

/// RMSProp optimizer (the A3C paper's choice, without momentum)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RmsProp {
    pub decay: f32,
    pub epsilon: f32,
    v: Vec<DenseParams>,
}

impl RmsProp {
    pub fn new(decay: f32, epsilon: f32) -> Self {
        RmsProp {
            decay,
            epsilon,
            v: Vec::new(),
        }
    }
}

impl Default for RmsProp {
    fn default() -> Self {
        Self::new(0.99, 1e-5)
    }
}

impl Optimizer for RmsProp {
    fn begin_step(&mut self, params: &[DenseParams]) {
        if self.v.len() != params.len() {
            self.v = params.iter().map(DenseParams::zeros_like).collect();
        }
    }

    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (decay, eps) = (self.decay, self.epsilon);
        let v = &mut self.v[slot].weights;
        v.zip_mut_with(gradients, |v, &g| *v = decay * *v + (1.0 - decay) * g * g);
        ndarray::Zip::from(weights).and(gradients).and(&*v).for_each(|w, &g, &v| {
            *w -= learning_rate * g / (v.sqrt() + eps);
        });
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (decay, eps) = (self.decay, self.epsilon);
        let v = &mut self.v[slot].biases;
        v.zip_mut_with(gradients, |v, &g| *v = decay * *v + (1.0 - decay) * g * g);
        ndarray::Zip::from(biases).and(gradients).and(&*v).for_each(|b, &g, &v| {
            *b -= learning_rate * g / (v.sqrt() + eps);
        });
    }
}

/// Serializable optimizer choice, resolved into an [`OptimizerWrapper`] at training start.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd {
        learning_rate: f32,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    RmsProp {
        learning_rate: f32,
        decay: f32,
        epsilon: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam {
            learning_rate: 1e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// Optimizer families selectable by name, e.g. from the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    Sgd,
    Adam,
    RmsProp,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 3] = [OptimizerKind::Sgd, OptimizerKind::Adam, OptimizerKind::RmsProp];

    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
            OptimizerKind::RmsProp => "rmsprop",
        }
    }

    /// Case-insensitive lookup
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| {
                A3cError::invalid_parameter(
                    "optimizer".to_string(),
                    format!("unknown optimizer '{}' (expected sgd, adam or rmsprop)", name),
                )
            })
    }

    /// Default hyperparameters of this family at `learning_rate`
    pub fn config(&self, learning_rate: f32) -> OptimizerConfig {
        match self {
            OptimizerKind::Sgd => OptimizerConfig::Sgd { learning_rate },
            OptimizerKind::Adam => OptimizerConfig::Adam {
                learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            },
            OptimizerKind::RmsProp => OptimizerConfig::RmsProp {
                learning_rate,
                decay: 0.99,
                epsilon: 1e-5,
            },
        }
    }
}

impl std::str::FromStr for OptimizerKind {
    type Err = A3cError;

    fn from_str(s: &str) -> Result<Self> {
        OptimizerKind::from_name(s)
    }
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OptimizerConfig {
    /// Parse a CLI optimizer name with the given learning rate.
    pub fn from_name(name: &str, learning_rate: f32) -> Result<Self> {
        Ok(OptimizerKind::from_name(name)?.config(learning_rate))
    }

    pub fn kind(&self) -> OptimizerKind {
        match self {
            OptimizerConfig::Sgd { .. } => OptimizerKind::Sgd,
            OptimizerConfig::Adam { .. } => OptimizerKind::Adam,
            OptimizerConfig::RmsProp { .. } => OptimizerKind::RmsProp,
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Sgd { learning_rate }
            | OptimizerConfig::Adam { learning_rate, .. }
            | OptimizerConfig::RmsProp { learning_rate, .. } => *learning_rate,
        }
    }

    pub fn build(&self) -> OptimizerWrapper {
        match *self {
            OptimizerConfig::Sgd { .. } => OptimizerWrapper::Sgd(Sgd::new()),
            OptimizerConfig::Adam { beta1, beta2, epsilon, .. } => {
                OptimizerWrapper::Adam(Adam::new(beta1, beta2, epsilon))
            }
            OptimizerConfig::RmsProp { decay, epsilon, .. } => {
                OptimizerWrapper::RmsProp(RmsProp::new(decay, epsilon))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn quadratic_step(optimizer: &mut OptimizerWrapper, steps: usize) -> f32 {
        // minimise 0.5 * ||w||^2, gradient = w
        let mut params = vec![DenseParams::new(arr2(&[[1.0, -2.0]]), arr1(&[0.5, 3.0]))];
        for _ in 0..steps {
            let grads = params.clone();
            optimizer.apply_gradients(&mut params, &grads, 0.05);
        }
        params[0].norm_sq()
    }

    #[test]
    fn test_all_optimizers_descend() {
        let start = DenseParams::new(arr2(&[[1.0, -2.0]]), arr1(&[0.5, 3.0])).norm_sq();
        for mut opt in [
            OptimizerWrapper::Sgd(Sgd::new()),
            OptimizerWrapper::Adam(Adam::default()),
            OptimizerWrapper::RmsProp(RmsProp::default()),
        ] {
            let end = quadratic_step(&mut opt, 50);
            assert!(end < start, "{} did not descend: {} -> {}", opt.name(), start, end);
        }
    }

    #[test]
    fn test_adam_keeps_one_slot_per_block() {
        let mut params = vec![DenseParams::zeros(2, 3), DenseParams::zeros(3, 1)];
        let grads = vec![
            DenseParams::new(Array2::ones((2, 3)), Array1::ones(3)),
            DenseParams::new(Array2::ones((3, 1)), Array1::ones(1)),
        ];
        let mut adam = Adam::default();
        adam.apply_gradients(&mut params, &grads, 0.1);
        adam.apply_gradients(&mut params, &grads, 0.1);
        assert_eq!(adam.t, 2);
        assert_eq!(adam.m.len(), 2);
        assert_eq!(adam.m[1].weights.dim(), (3, 1));
    }

    #[test]
    fn test_sgd_step_is_exact() {
        let mut params = vec![DenseParams::new(arr2(&[[1.0]]), arr1(&[1.0]))];
        let grads = vec![DenseParams::new(arr2(&[[2.0]]), arr1(&[-4.0]))];
        Sgd::new().apply_gradients(&mut params, &grads, 0.25);
        assert_eq!(params[0].weights[[0, 0]], 0.5);
        assert_eq!(params[0].biases[0], 2.0);
    }

    #[test]
    fn test_config_from_name() {
        assert!(matches!(OptimizerConfig::from_name("Adam", 1e-3), Ok(OptimizerConfig::Adam { .. })));
        assert!(OptimizerConfig::from_name("lbfgs", 1e-3).is_err());
        assert_eq!(OptimizerConfig::from_name("sgd", 0.5).unwrap().learning_rate(), 0.5);
    }

    #[test]
    fn test_kind_parses_and_round_trips() {
        assert_eq!("RMSProp".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert!("adagrad".parse::<OptimizerKind>().is_err());
        for kind in OptimizerKind::ALL {
            assert_eq!(kind.as_str().parse::<OptimizerKind>().unwrap(), kind);
            assert_eq!(kind.config(1e-3).kind(), kind);
        }
    }
}
