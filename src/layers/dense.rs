use ndarray::{Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::params::DenseParams;
use super::initialization::WeightInit;

/// A fully connected (dense) layer: shape and activation only.
///
/// Values live in a [`DenseParams`] block owned by a parameter store, so the
/// same layer can be evaluated against the global or the local copy.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DenseLayer {
    pub input_size: usize,
    pub output_size: usize,
    pub activation: Activation,
    pub init: WeightInit,
}

/// Values saved by [`DenseLayer::forward_batch`] for the backward pass
#[derive(Clone, Debug)]
pub struct DenseCache {
    inputs: Array2<f32>,
    pre_activation_output: Array2<f32>,
}

impl DenseLayer {
    /// Create a new dense layer with the initializer recommended for `activation`.
    pub fn new(input_size: usize, output_size: usize, activation: Activation) -> Self {
        DenseLayer {
            input_size,
            output_size,
            activation,
            init: WeightInit::for_activation(&activation),
        }
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    pub fn init_params<R: Rng + ?Sized>(&self, rng: &mut R) -> DenseParams {
        DenseParams::new(
            self.init.initialize_weights((self.input_size, self.output_size), rng),
            self.init.initialize_biases(self.output_size),
        )
    }

    /// Forward pass for a batch (one row per sample).
    pub fn forward_batch(&self, params: &DenseParams, inputs: ArrayView2<f32>) -> (Array2<f32>, DenseCache) {
        let pre_activation_output = inputs.dot(&params.weights) + &params.biases.view().insert_axis(Axis(0));
        let mut outputs = pre_activation_output.clone();
        self.activation.apply_batch(&mut outputs);
        let cache = DenseCache {
            inputs: inputs.to_owned(),
            pre_activation_output,
        };
        (outputs, cache)
    }

    /// Backward pass for a batch.
    ///
    /// Takes dLoss/dOutput and returns dLoss/dInput together with the
    /// gradient block for this layer's weights and biases.
    pub fn backward_batch(
        &self,
        params: &DenseParams,
        cache: &DenseCache,
        output_errors: ArrayView2<f32>,
    ) -> (Array2<f32>, DenseParams) {
        let activation_deriv = self.activation.derivative_batch(cache.pre_activation_output.view());
        let adjusted_error = &output_errors * &activation_deriv;
        let weight_gradients = cache.inputs.t().dot(&adjusted_error);
        let bias_gradients = adjusted_error.sum_axis(Axis(0));
        let input_errors = adjusted_error.dot(&params.weights.t());

        (input_errors, DenseParams::new(weight_gradients, bias_gradients))
    }
}
