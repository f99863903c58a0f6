//! Categorical action distribution over unnormalized logits.
//!
//! Besides sampling and the usual statistics, the distribution exposes the
//! analytic gradients of its negative log-likelihood and entropy with respect
//! to the logits; the policies chain these through their networks.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::Rng;

use crate::error::{A3cError, Result};

/// Batch of categorical distributions, one per row of logits
#[derive(Clone, Debug)]
pub struct Categorical {
    log_probs: Array2<f32>,
    probs: Array2<f32>,
}

impl Categorical {
    /// Build from a `(batch, num_actions)` logits matrix using a stable log-softmax.
    pub fn new(logits: &Array2<f32>) -> Self {
        let mut log_probs = logits.clone();
        for mut row in log_probs.axis_iter_mut(Axis(0)) {
            let max_logit = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let log_sum_exp = row.iter().map(|&x| (x - max_logit).exp()).sum::<f32>().ln() + max_logit;
            row.mapv_inplace(|x| x - log_sum_exp);
        }
        let probs = log_probs.mapv(f32::exp);
        Categorical { log_probs, probs }
    }

    pub fn batch_size(&self) -> usize {
        self.probs.nrows()
    }

    pub fn num_actions(&self) -> usize {
        self.probs.ncols()
    }

    pub fn probs(&self) -> &Array2<f32> {
        &self.probs
    }

    pub fn log_probs(&self) -> &Array2<f32> {
        &self.log_probs
    }

    fn check_actions(&self, actions: &[usize]) -> Result<()> {
        if actions.len() != self.batch_size() {
            return Err(A3cError::dimension_mismatch(
                format!("{} actions", self.batch_size()),
                format!("{} actions", actions.len()),
            ));
        }
        if let Some(&bad) = actions.iter().find(|&&a| a >= self.num_actions()) {
            return Err(A3cError::invalid_parameter(
                "action".to_string(),
                format!("{} out of range for {} actions", bad, self.num_actions()),
            ));
        }
        Ok(())
    }

    /// log π(a_t | s_t) for every row
    pub fn log_prob(&self, actions: &[usize]) -> Result<Array1<f32>> {
        self.check_actions(actions)?;
        Ok(actions
            .iter()
            .enumerate()
            .map(|(t, &a)| self.log_probs[[t, a]])
            .collect())
    }

    /// -log π(a_t | s_t) for every row
    pub fn neglogp(&self, actions: &[usize]) -> Result<Array1<f32>> {
        Ok(self.log_prob(actions)?.mapv(|x| -x))
    }

    /// Entropy of every row
    pub fn entropy(&self) -> Array1<f32> {
        (&self.probs * &self.log_probs).sum_axis(Axis(1)).mapv(|x| -x)
    }

    /// Sample one action per row by inverse CDF.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        self.probs
            .axis_iter(Axis(0))
            .map(|row| {
                let rand_val: f32 = rng.gen();
                let mut cumsum = 0.0;
                for (i, &p) in row.iter().enumerate() {
                    cumsum += p;
                    if rand_val < cumsum {
                        return i;
                    }
                }
                // rounding left the cumulative sum just below 1.0
                row.len() - 1
            })
            .collect()
    }

    /// Most likely action per row (lowest index on ties)
    pub fn mode(&self) -> Vec<usize> {
        self.probs
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                    .0
            })
            .collect()
    }

    /// d(Σ_t w_t · neglogp_t) / d logits  =  w_t · (π_t - onehot(a_t))
    pub fn neglogp_grad(&self, actions: &[usize], weights: ArrayView1<f32>) -> Result<Array2<f32>> {
        self.check_actions(actions)?;
        let mut grad = self.probs.clone();
        for (t, &a) in actions.iter().enumerate() {
            grad[[t, a]] -= 1.0;
            let w = weights[t];
            grad.row_mut(t).mapv_inplace(|g| g * w);
        }
        Ok(grad)
    }

    /// d(Σ_t H_t) / d logits  =  -π_t · (log π_t + H_t)
    pub fn entropy_grad(&self) -> Array2<f32> {
        let entropy = self.entropy();
        let mut grad = &self.log_probs + &entropy.insert_axis(Axis(1));
        grad.zip_mut_with(&self.probs, |g, &p| *g = -p * *g);
        grad
    }
}
