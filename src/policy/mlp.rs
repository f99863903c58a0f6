use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{A3cError, Result};
use crate::layers::WeightInit;
use crate::network::NeuralNetwork;
use crate::optimizer::GradientClipper;
use crate::params::{Gradients, Parameters};

use super::{check_observations, ForwardPass, PassCache, Policy};

/// Feed-forward actor-critic policy with separate policy and value towers.
///
/// Parameter blocks are `pi/dense_*` followed by `vf/dense_*`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MlpPolicy {
    actor: NeuralNetwork,
    critic: NeuralNetwork,
    clipper: GradientClipper,
}

impl MlpPolicy {
    pub fn new(observation_size: usize, num_actions: usize, hidden_sizes: &[usize]) -> Result<Self> {
        if num_actions == 0 {
            return Err(A3cError::invalid_parameter("num_actions", "must be positive"));
        }
        let actor = NeuralNetwork::mlp(observation_size, hidden_sizes, num_actions, Activation::Tanh)?
            .with_output_init(WeightInit::NormalizedColumns { std: 0.01 });
        let critic = NeuralNetwork::mlp(observation_size, hidden_sizes, 1, Activation::Tanh)?
            .with_output_init(WeightInit::NormalizedColumns { std: 1.0 });
        Ok(MlpPolicy {
            actor,
            critic,
            clipper: GradientClipper::ClipByGlobalNorm { max_norm: 40.0 },
        })
    }

    /// Replace the gradient-preprocessing clipper.
    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }
}

impl Policy for MlpPolicy {
    fn type_name(&self) -> &'static str {
        "Mlp"
    }

    fn observation_size(&self) -> usize {
        self.actor.input_size()
    }

    fn num_actions(&self) -> usize {
        self.actor.output_size()
    }

    fn init_parameters(&self, rng: &mut dyn RngCore) -> Parameters {
        let mut params = Parameters::new();
        self.actor.init_params("pi", &mut params, rng);
        self.critic.init_params("vf", &mut params, rng);
        params
    }

    fn forward(
        &self,
        params: &Parameters,
        observations: ArrayView2<f32>,
        _state: Option<ArrayView1<f32>>,
    ) -> Result<ForwardPass> {
        check_observations(self, observations)?;
        let split = self.actor.num_layers();
        if params.len() != split + self.critic.num_layers() {
            return Err(A3cError::dimension_mismatch(
                format!("{} parameter blocks", split + self.critic.num_layers()),
                format!("{} parameter blocks", params.len()),
            ));
        }
        let (actor_blocks, critic_blocks) = params.blocks().split_at(split);

        let (logits, actor) = self.actor.forward_batch(actor_blocks, observations)?;
        let (values, critic) = self.critic.forward_batch(critic_blocks, observations)?;

        Ok(ForwardPass {
            logits,
            values: values.index_axis_move(Axis(1), 0),
            final_state: None,
            cache: PassCache::Mlp { actor, critic },
        })
    }

    fn backward(
        &self,
        params: &Parameters,
        pass: &ForwardPass,
        logits_grad: ArrayView2<f32>,
        values_grad: ArrayView1<f32>,
    ) -> Result<Gradients> {
        let (actor_cache, critic_cache) = match &pass.cache {
            PassCache::Mlp { actor, critic } => (actor, critic),
            _ => return Err(A3cError::invalid_parameter("pass", "forward pass was not produced by an Mlp policy")),
        };
        let (actor_blocks, critic_blocks) = params.blocks().split_at(self.actor.num_layers());

        let (_, mut blocks) = self.actor.backward_batch(actor_blocks, actor_cache, logits_grad);
        let (_, critic_grads) = self
            .critic
            .backward_batch(critic_blocks, critic_cache, values_grad.insert_axis(Axis(1)));
        blocks.extend(critic_grads);

        Ok(Gradients::from_blocks(blocks))
    }

    fn preprocess_gradients(&self, gradients: &mut Gradients) -> f32 {
        self.clipper.clip(gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parameter_layout() {
        let policy = MlpPolicy::new(4, 2, &[16, 16]).unwrap();
        let params = policy.init_parameters(&mut StdRng::seed_from_u64(1));
        assert_eq!(params.len(), 6);
        assert_eq!(params.names()[0], "pi/dense_0");
        assert_eq!(params.names()[3], "vf/dense_0");
        assert_eq!(params.blocks()[2].weights.shape(), [16, 2]);
        assert_eq!(params.blocks()[5].weights.shape(), [16, 1]);
    }

    #[test]
    fn test_initial_policy_is_near_uniform() {
        let policy = MlpPolicy::new(4, 2, &[16]).unwrap();
        let params = policy.init_parameters(&mut StdRng::seed_from_u64(1));
        let obs = arr2(&[[0.1, 0.2, -0.1, 0.0]]);
        let pass = policy.forward(&params, obs.view(), None).unwrap();
        let probs = pass.distribution().probs().clone();
        assert!((probs[[0, 0]] - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_value_gradient_matches_finite_difference() {
        let policy = MlpPolicy::new(3, 2, &[5]).unwrap();
        let params = policy.init_parameters(&mut StdRng::seed_from_u64(2));
        let obs = arr2(&[[0.3, -0.1, 0.5], [0.0, 0.2, -0.4]]);
        let pass = policy.forward(&params, obs.view(), None).unwrap();
        let grads = policy
            .backward(&params, &pass, Array2::zeros((2, 2)).view(), Array1::ones(2).view())
            .unwrap();

        // loss = sum of values; perturb the first critic weight
        let eps = 1e-3;
        let mut plus = params.clone();
        plus.blocks_mut()[2].weights[[0, 0]] += eps;
        let mut minus = params.clone();
        minus.blocks_mut()[2].weights[[0, 0]] -= eps;
        let f = |p: &Parameters| policy.forward(p, obs.view(), None).unwrap().values.sum();
        let numeric = (f(&plus) - f(&minus)) / (2.0 * eps);
        assert!((numeric - grads.blocks()[2].weights[[0, 0]]).abs() < 1e-2);
        // the policy tower receives nothing from a value-only loss
        assert_eq!(grads.blocks()[0].norm_sq(), 0.0);
    }

    #[test]
    fn test_preprocess_clips_global_norm() {
        let policy = MlpPolicy::new(2, 2, &[3])
            .unwrap()
            .with_clipper(GradientClipper::ClipByGlobalNorm { max_norm: 1.0 });
        let params = policy.init_parameters(&mut StdRng::seed_from_u64(0));
        let mut grads = Gradients::zeros_like(&params);
        grads.blocks_mut()[0].biases.assign(&arr1(&[3.0, 4.0, 0.0]));
        let raw = policy.preprocess_gradients(&mut grads);
        assert!((raw - 5.0).abs() < 1e-6);
        assert!((grads.global_norm() - 1.0).abs() < 1e-5);
    }
}
