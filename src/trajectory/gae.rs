use ndarray::{Array1, ArrayView1};

use crate::error::{A3cError, Result};

/// Per-timestep advantages and value regression targets of one trajectory
#[derive(Clone, Debug, PartialEq)]
pub struct AdvantageEstimate {
    pub advantages: Array1<f32>,
    pub value_targets: Array1<f32>,
}

/// Generalized advantage estimation as a single backward pass.
///
/// ```text
/// δ_t = r_t + γ·V_{t+1}·(1 - done_t) - V_t        V_T = bootstrap_value
/// A_t = δ_t + γλ·(1 - done_t)·A_{t+1}
/// ```
///
/// Value targets are `A_t + V_t`.
pub fn gae(
    rewards: ArrayView1<f32>,
    values: ArrayView1<f32>,
    dones: &[bool],
    bootstrap_value: f32,
    gamma: f32,
    lambda: f32,
) -> Result<AdvantageEstimate> {
    let n = rewards.len();
    if n == 0 {
        return Err(A3cError::EmptyTrajectory);
    }
    if values.len() != n || dones.len() != n {
        return Err(A3cError::dimension_mismatch(
            format!("{} values and dones", n),
            format!("{} values, {} dones", values.len(), dones.len()),
        ));
    }

    let mut advantages = Array1::zeros(n);
    let mut next_value = bootstrap_value;
    let mut next_advantage = 0.0;
    for t in (0..n).rev() {
        let not_done = if dones[t] { 0.0 } else { 1.0 };
        let delta = rewards[t] + gamma * next_value * not_done - values[t];
        let advantage = delta + gamma * lambda * not_done * next_advantage;
        advantages[t] = advantage;
        next_value = values[t];
        next_advantage = advantage;
    }

    let value_targets = &advantages + &values;
    Ok(AdvantageEstimate {
        advantages,
        value_targets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_zero_rewards_constant_value_terminal() {
        // V = 0 everywhere: nothing to learn
        let rewards = Array1::zeros(6);
        let values = Array1::zeros(6);
        let mut dones = vec![false; 6];
        dones[5] = true;
        let est = gae(rewards.view(), values.view(), &dones, 0.0, 0.99, 0.95).unwrap();
        for &a in est.advantages.iter() {
            assert_abs_diff_eq!(a, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_terminal_reward_full_return_minus_baseline() {
        let r = 2.5;
        let rewards = arr1(&[0.0, 0.0, 0.0, r]);
        let values = arr1(&[0.3, -0.1, 0.7, 1.2]);
        let dones = [false, false, false, true];
        let est = gae(rewards.view(), values.view(), &dones, 99.0, 1.0, 1.0).unwrap();
        for t in 0..4 {
            assert_abs_diff_eq!(est.advantages[t], r - values[t], epsilon = 1e-5);
            assert_abs_diff_eq!(est.value_targets[t], r, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_single_step_is_delta() {
        let est = gae(arr1(&[1.0]).view(), arr1(&[0.4]).view(), &[false], 2.0, 0.9, 0.5).unwrap();
        assert_abs_diff_eq!(est.advantages[0], 1.0 + 0.9 * 2.0 - 0.4, epsilon = 1e-6);

        let est = gae(arr1(&[1.0]).view(), arr1(&[0.4]).view(), &[true], 2.0, 0.9, 0.5).unwrap();
        assert_abs_diff_eq!(est.advantages[0], 1.0 - 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_bootstrap_used_only_without_termination() {
        let rewards = arr1(&[0.0, 0.0]);
        let values = arr1(&[0.0, 0.0]);
        let cut = gae(rewards.view(), values.view(), &[false, false], 1.0, 0.5, 1.0).unwrap();
        assert_abs_diff_eq!(cut.advantages[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(cut.advantages[0], 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(gae(arr1(&[0.0, 1.0]).view(), arr1(&[0.0]).view(), &[false, true], 0.0, 0.99, 0.95).is_err());
        assert!(matches!(
            gae(Array1::zeros(0).view(), Array1::zeros(0).view(), &[], 0.0, 0.99, 0.95),
            Err(A3cError::EmptyTrajectory)
        ));
    }
}
