use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{A3cError, Result};
use crate::layers::{DenseLayer, WeightInit};
use crate::optimizer::GradientClipper;
use crate::params::{Gradients, Parameters};

use super::{check_observations, ForwardPass, PassCache, Policy};

/// Elman recurrent actor-critic policy.
///
/// `h_t = tanh([x_t, h_{t-1}] W + b)`, followed by linear policy and value
/// heads on `h_t`. Gradients flow back through the whole segment, starting
/// from the state recorded at the beginning of the segment.
///
/// Parameter blocks are `rnn/cell`, `pi/logits`, `vf/value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecurrentPolicy {
    observation_size: usize,
    hidden_size: usize,
    cell: DenseLayer,
    policy_head: DenseLayer,
    value_head: DenseLayer,
    clipper: GradientClipper,
}

const CELL: usize = 0;
const POLICY_HEAD: usize = 1;
const VALUE_HEAD: usize = 2;

impl RecurrentPolicy {
    pub fn new(observation_size: usize, num_actions: usize, hidden_size: usize) -> Result<Self> {
        if num_actions == 0 || hidden_size == 0 {
            return Err(A3cError::invalid_parameter(
                "recurrent policy",
                "num_actions and hidden_size must be positive",
            ));
        }
        Ok(RecurrentPolicy {
            observation_size,
            hidden_size,
            cell: DenseLayer::new(observation_size + hidden_size, hidden_size, Activation::Tanh),
            policy_head: DenseLayer::new(hidden_size, num_actions, Activation::Linear)
                .with_init(WeightInit::NormalizedColumns { std: 0.01 }),
            value_head: DenseLayer::new(hidden_size, 1, Activation::Linear)
                .with_init(WeightInit::NormalizedColumns { std: 1.0 }),
            clipper: GradientClipper::ClipByGlobalNorm { max_norm: 40.0 },
        })
    }

    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }
}

impl Policy for RecurrentPolicy {
    fn type_name(&self) -> &'static str {
        "Recurrent"
    }

    fn observation_size(&self) -> usize {
        self.observation_size
    }

    fn num_actions(&self) -> usize {
        self.policy_head.output_size
    }

    fn init_parameters(&self, rng: &mut dyn RngCore) -> Parameters {
        let mut params = Parameters::new();
        params.push("rnn/cell", self.cell.init_params(rng));
        params.push("pi/logits", self.policy_head.init_params(rng));
        params.push("vf/value", self.value_head.init_params(rng));
        params
    }

    fn initial_state(&self) -> Option<Array1<f32>> {
        Some(Array1::zeros(self.hidden_size))
    }

    fn forward(
        &self,
        params: &Parameters,
        observations: ArrayView2<f32>,
        state: Option<ArrayView1<f32>>,
    ) -> Result<ForwardPass> {
        check_observations(self, observations)?;
        if params.len() != 3 {
            return Err(A3cError::dimension_mismatch("3 parameter blocks".to_string(), format!("{} parameter blocks", params.len())));
        }
        let blocks = params.blocks();

        let mut h = match state {
            Some(s) if s.len() == self.hidden_size => s.to_owned().insert_axis(Axis(0)),
            Some(s) => {
                return Err(A3cError::dimension_mismatch(
                    format!("state of size {}", self.hidden_size),
                    format!("state of size {}", s.len()),
                ))
            }
            None => Array2::zeros((1, self.hidden_size)),
        };

        let steps = observations.nrows();
        let mut hidden = Array2::zeros((steps, self.hidden_size));
        let mut cells = Vec::with_capacity(steps);
        for t in 0..steps {
            let input = concatenate![Axis(1), observations.slice(s![t..t + 1, ..]), h];
            let (next, cache) = self.cell.forward_batch(&blocks[CELL], input.view());
            hidden.row_mut(t).assign(&next.row(0));
            cells.push(cache);
            h = next;
        }

        let (logits, policy_head) = self.policy_head.forward_batch(&blocks[POLICY_HEAD], hidden.view());
        let (values, value_head) = self.value_head.forward_batch(&blocks[VALUE_HEAD], hidden.view());

        Ok(ForwardPass {
            logits,
            values: values.index_axis_move(Axis(1), 0),
            final_state: Some(h.index_axis_move(Axis(0), 0)),
            cache: PassCache::Recurrent {
                cells,
                hidden,
                policy_head,
                value_head,
            },
        })
    }

    fn backward(
        &self,
        params: &Parameters,
        pass: &ForwardPass,
        logits_grad: ArrayView2<f32>,
        values_grad: ArrayView1<f32>,
    ) -> Result<Gradients> {
        let (cells, policy_cache, value_cache) = match &pass.cache {
            PassCache::Recurrent { cells, policy_head, value_head, .. } => (cells, policy_head, value_head),
            _ => return Err(A3cError::invalid_parameter("pass", "forward pass was not produced by a Recurrent policy")),
        };
        let blocks = params.blocks();
        let mut gradients = Gradients::zeros_like(params);

        let (d_hidden_pi, g_pi) = self.policy_head.backward_batch(&blocks[POLICY_HEAD], policy_cache, logits_grad);
        let (d_hidden_vf, g_vf) =
            self.value_head
                .backward_batch(&blocks[VALUE_HEAD], value_cache, values_grad.insert_axis(Axis(1)));
        gradients.accumulate(POLICY_HEAD, &g_pi);
        gradients.accumulate(VALUE_HEAD, &g_vf);
        let d_hidden = d_hidden_pi + d_hidden_vf;

        // backpropagation through time
        let mut d_next = Array2::<f32>::zeros((1, self.hidden_size));
        for t in (0..cells.len()).rev() {
            let d_h = &d_hidden.slice(s![t..t + 1, ..]) + &d_next;
            let (d_input, g_cell) = self.cell.backward_batch(&blocks[CELL], &cells[t], d_h.view());
            gradients.accumulate(CELL, &g_cell);
            d_next = d_input.slice(s![.., self.observation_size..]).to_owned();
        }

        Ok(gradients)
    }

    fn preprocess_gradients(&self, gradients: &mut Gradients) -> f32 {
        self.clipper.clip(gradients)
    }
}
