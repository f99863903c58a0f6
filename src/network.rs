use ndarray::{Array2, ArrayView2};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;
use crate::error::{A3cError, Result};
use crate::layers::{DenseCache, DenseLayer, WeightInit};
use crate::params::{DenseParams, Parameters};

/// A feed-forward stack of dense layers.
///
/// The network only describes the architecture; forward and backward passes
/// take the parameter blocks explicitly (one block per layer, in order).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NeuralNetwork {
    pub layers: Vec<DenseLayer>,
}

/// Per-layer caches of one forward pass
#[derive(Clone, Debug)]
pub struct NetworkCache {
    layers: Vec<DenseCache>,
}

impl NeuralNetwork {
    /// Create a new neural network with the given layer sizes and activations.
    pub fn new(layer_sizes: &[usize], activations: &[Activation]) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(A3cError::invalid_parameter(
                "layer_sizes",
                "network must have at least input and output sizes",
            ));
        }
        if layer_sizes.len() - 1 != activations.len() {
            return Err(A3cError::dimension_mismatch(
                format!("{} activations", layer_sizes.len() - 1),
                format!("{} activations", activations.len()),
            ));
        }

        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .map(|(window, &activation)| DenseLayer::new(window[0], window[1], activation))
            .collect();

        Ok(NeuralNetwork { layers })
    }

    /// Hidden layers with `hidden` activation followed by a linear output layer.
    pub fn mlp(input_size: usize, hidden_sizes: &[usize], output_size: usize, hidden: Activation) -> Result<Self> {
        let mut sizes = vec![input_size];
        sizes.extend_from_slice(hidden_sizes);
        sizes.push(output_size);
        let activations = vec![hidden; hidden_sizes.len()]
            .into_iter()
            .chain(std::iter::once(Activation::Linear))
            .collect::<Vec<_>>();
        Self::new(&sizes, &activations)
    }

    /// Replace the initializer of the output layer.
    pub fn with_output_init(mut self, init: WeightInit) -> Self {
        if let Some(last) = self.layers.last_mut() {
            last.init = init;
        }
        self
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_size)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_size)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Append freshly initialized blocks named `{prefix}/dense_{i}` to `params`.
    pub fn init_params<R: Rng + ?Sized>(&self, prefix: &str, params: &mut Parameters, rng: &mut R) {
        for (i, layer) in self.layers.iter().enumerate() {
            params.push(format!("{}/dense_{}", prefix, i), layer.init_params(rng));
        }
    }

    /// Forward pass for a batch of inputs.
    pub fn forward_batch(&self, params: &[DenseParams], inputs: ArrayView2<f32>) -> Result<(Array2<f32>, NetworkCache)> {
        self.check_params(params)?;
        if inputs.ncols() != self.input_size() {
            return Err(A3cError::dimension_mismatch(
                format!("{} input features", self.input_size()),
                format!("{} input features", inputs.ncols()),
            ));
        }

        let mut caches = Vec::with_capacity(self.layers.len());
        let mut current_output = inputs.to_owned();
        for (layer, block) in self.layers.iter().zip(params) {
            let (output, cache) = layer.forward_batch(block, current_output.view());
            caches.push(cache);
            current_output = output;
        }
        Ok((current_output, NetworkCache { layers: caches }))
    }

    /// Backpropagate `output_errors` (dLoss/dOutput).
    ///
    /// Returns dLoss/dInput and one gradient block per layer, in layer order.
    pub fn backward_batch(
        &self,
        params: &[DenseParams],
        cache: &NetworkCache,
        output_errors: ArrayView2<f32>,
    ) -> (Array2<f32>, Vec<DenseParams>) {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current_error = output_errors.to_owned();

        for i in (0..self.layers.len()).rev() {
            let (input_error, block) = self.layers[i].backward_batch(&params[i], &cache.layers[i], current_error.view());
            gradients.push(block);
            current_error = input_error;
        }

        gradients.reverse();
        (current_error, gradients)
    }

    fn check_params(&self, params: &[DenseParams]) -> Result<()> {
        if params.len() != self.layers.len() {
            return Err(A3cError::dimension_mismatch(
                format!("{} parameter blocks", self.layers.len()),
                format!("{} parameter blocks", params.len()),
            ));
        }
        for (layer, block) in self.layers.iter().zip(params) {
            if block.weights.dim() != (layer.input_size, layer.output_size) {
                return Err(A3cError::dimension_mismatch(
                    format!("{:?}", (layer.input_size, layer.output_size)),
                    format!("{:?}", block.weights.dim()),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn build() -> (NeuralNetwork, Parameters) {
        let net = NeuralNetwork::mlp(3, &[4], 2, Activation::Tanh).unwrap();
        let mut params = Parameters::new();
        net.init_params("pi", &mut params, &mut StdRng::seed_from_u64(11));
        (net, params)
    }

    #[test]
    fn test_neural_network_creation() {
        let (net, params) = build();
        assert_eq!(net.num_layers(), 2);
        assert_eq!(params.blocks()[0].weights.shape(), [3, 4]);
        assert_eq!(params.blocks()[1].weights.shape(), [4, 2]);
        assert_eq!(params.names()[1], "pi/dense_1");
    }

    #[test]
    fn test_invalid_shapes_rejected() {
        assert!(NeuralNetwork::new(&[3], &[]).is_err());
        assert!(NeuralNetwork::new(&[3, 4, 2], &[Activation::Relu]).is_err());

        let (net, params) = build();
        let bad_input = arr2(&[[1.0, 2.0]]);
        assert!(net.forward_batch(params.blocks(), bad_input.view()).is_err());
    }

    #[test]
    fn test_backward_input_gradient() {
        let (net, params) = build();
        let x = arr2(&[[0.1, -0.3, 0.7]]);
        let (out, cache) = net.forward_batch(params.blocks(), x.view()).unwrap();
        let ones = Array2::ones(out.dim());
        let (dx, grads) = net.backward_batch(params.blocks(), &cache, ones.view());
        assert_eq!(grads.len(), 2);

        let eps = 1e-3;
        for j in 0..3 {
            let mut xp = x.clone();
            xp[[0, j]] += eps;
            let mut xm = x.clone();
            xm[[0, j]] -= eps;
            let fp = net.forward_batch(params.blocks(), xp.view()).unwrap().0.sum();
            let fm = net.forward_batch(params.blocks(), xm.view()).unwrap().0.sum();
            assert!(((fp - fm) / (2.0 * eps) - dx[[0, j]]).abs() < 1e-2);
        }
    }
}
