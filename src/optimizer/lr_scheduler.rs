use serde::{Serialize, Deserialize};

/// Learning rate schedules, evaluated at the global step (environment timesteps)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LearningRateScheduler {
    /// Constant learning rate
    Constant { lr: f32 },

    /// Step decay: lr = initial_lr * decay_rate^(step / step_size)
    StepDecay {
        initial_lr: f32,
        decay_rate: f32,
        step_size: u64,
    },

    /// Linear decay: lr = initial_lr * (1 - step / max_steps), floored at `final_lr`
    LinearDecay {
        initial_lr: f32,
        final_lr: f32,
        max_steps: u64,
    },
}

impl LearningRateScheduler {
    /// Get the learning rate for a given step
    pub fn get_lr(&self, step: u64) -> f32 {
        match self {
            LearningRateScheduler::Constant { lr } => *lr,

            LearningRateScheduler::StepDecay { initial_lr, decay_rate, step_size } => {
                let num_decays = (step / (*step_size).max(1)) as f32;
                initial_lr * decay_rate.powf(num_decays)
            }

            LearningRateScheduler::LinearDecay { initial_lr, final_lr, max_steps } => {
                if step >= *max_steps {
                    *final_lr
                } else {
                    let progress = step as f32 / *max_steps as f32;
                    initial_lr * (1.0 - progress) + final_lr * progress
                }
            }
        }
    }

    /// Create a constant learning rate scheduler
    pub fn constant(lr: f32) -> Self {
        LearningRateScheduler::Constant { lr }
    }

    /// Anneal linearly to zero over the training budget
    pub fn linear_to_zero(initial_lr: f32, max_steps: u64) -> Self {
        LearningRateScheduler::LinearDecay {
            initial_lr,
            final_lr: 0.0,
            max_steps,
        }
    }
}
