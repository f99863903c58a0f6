use serde::{Serialize, Deserialize};

use crate::params::Gradients;

/// Gradient clipping methods, used as a policy's gradient-preprocessing hook
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum GradientClipper {
    /// Clip every element into `[min, max]`
    ClipByValue { min: f32, max: f32 },

    /// Rescale each block independently so its norm is at most `max_norm`
    ClipByNorm { max_norm: f32 },

    /// Rescale all blocks together so the global norm is at most `max_norm`
    ClipByGlobalNorm { max_norm: f32 },

    /// No clipping
    #[default]
    None,
}

impl GradientClipper {
    /// Clip in place and return the global norm measured before clipping.
    pub fn clip(&self, gradients: &mut Gradients) -> f32 {
        let global_norm = gradients.global_norm();
        match *self {
            GradientClipper::ClipByValue { min, max } => {
                for block in gradients.blocks_mut() {
                    block.weights.mapv_inplace(|g| g.max(min).min(max));
                    block.biases.mapv_inplace(|g| g.max(min).min(max));
                }
            }

            GradientClipper::ClipByNorm { max_norm } => {
                for block in gradients.blocks_mut() {
                    let norm = block.norm_sq().sqrt();
                    if norm > max_norm {
                        let scale = max_norm / norm;
                        block.weights.mapv_inplace(|g| g * scale);
                        block.biases.mapv_inplace(|g| g * scale);
                    }
                }
            }

            GradientClipper::ClipByGlobalNorm { max_norm } => {
                if global_norm > max_norm {
                    gradients.scale(max_norm / global_norm);
                }
            }

            GradientClipper::None => {}
        }
        global_norm
    }
}
