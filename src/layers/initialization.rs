use ndarray::{Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use rand_distr::{Normal, StandardNormal, Uniform};
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::activations::Activation;

/// Weight initialization strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WeightInit {
    /// Xavier/Glorot uniform initialization
    XavierUniform,

    /// He/Kaiming normal initialization (for ReLU)
    HeNormal,

    /// Gaussian columns rescaled to L2 norm `std`; small `std` keeps the
    /// initial policy close to uniform
    NormalizedColumns { std: f32 },

    /// Uniform distribution with custom range
    Uniform { min: f32, max: f32 },

    /// All zeros
    Zeros,
}

impl WeightInit {
    /// Initialize a `(fan_in, fan_out)` weight matrix
    pub fn initialize_weights<R: Rng + ?Sized>(&self, shape: (usize, usize), rng: &mut R) -> Array2<f32> {
        let (fan_in, fan_out) = shape;

        match *self {
            WeightInit::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                Array2::random_using(shape, Uniform::new_inclusive(-limit, limit), rng)
            }

            WeightInit::HeNormal => {
                let std = (2.0 / fan_in.max(1) as f32).sqrt();
                match Normal::new(0.0, std) {
                    Ok(dist) => Array2::random_using(shape, dist, rng),
                    Err(_) => Array2::zeros(shape),
                }
            }

            WeightInit::NormalizedColumns { std } => {
                let mut w: Array2<f32> = Array2::random_using(shape, StandardNormal, rng);
                for mut column in w.axis_iter_mut(Axis(1)) {
                    let norm = column.iter().map(|&x| x * x).sum::<f32>().sqrt();
                    if norm > 0.0 {
                        column.mapv_inplace(|x| x * std / norm);
                    }
                }
                w
            }

            WeightInit::Uniform { min, max } => {
                Array2::random_using(shape, Uniform::new_inclusive(min, max), rng)
            }

            WeightInit::Zeros => Array2::zeros(shape),
        }
    }

    /// Biases always start at zero
    pub fn initialize_biases(&self, size: usize) -> Array1<f32> {
        Array1::zeros(size)
    }

    /// Get the recommended initialization for an activation function
    pub fn for_activation(activation: &Activation) -> Self {
        match activation {
            Activation::Relu | Activation::LeakyRelu { .. } => WeightInit::HeNormal,
            Activation::Sigmoid | Activation::Tanh | Activation::Linear => WeightInit::XavierUniform,
        }
    }
}
