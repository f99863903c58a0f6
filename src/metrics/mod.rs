//! Reward and episode statistics.

use serde::{Deserialize, Serialize};

/// Summary statistics of a set of values (population standard deviation)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f32,
    pub std: f32,
    pub min: f32,
    pub max: f32,
    pub count: usize,
}

impl Statistics {
    /// Compute statistics from a slice of values
    pub fn from_slice(values: &[f32]) -> Self {
        if values.is_empty() {
            return Statistics {
                mean: 0.0,
                std: 0.0,
                min: 0.0,
                max: 0.0,
                count: 0,
            };
        }

        let count = values.len();
        let mean = values.iter().sum::<f32>() / count as f32;
        let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / count as f32;

        Statistics {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f32::INFINITY, f32::min),
            max: values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            count,
        }
    }
}

/// Running statistics that can be updated incrementally
#[derive(Debug, Clone)]
pub struct RunningStats {
    count: usize,
    mean: f64,
    m2: f64,
    min: f32,
    max: f32,
}

impl RunningStats {
    pub fn new() -> Self {
        RunningStats {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f32::INFINITY,
            max: f32::NEG_INFINITY,
        }
    }

    /// Update with a new value
    pub fn update(&mut self, value: f32) {
        self.count += 1;
        let delta = value as f64 - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value as f64 - self.mean;
        self.m2 += delta * delta2;

        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f32 {
        self.mean as f32
    }

    /// Population variance
    pub fn variance(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64) as f32
        }
    }

    pub fn std(&self) -> f32 {
        self.variance().sqrt()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn to_statistics(&self) -> Statistics {
        if self.count == 0 {
            return Statistics::from_slice(&[]);
        }
        Statistics {
            mean: self.mean(),
            std: self.std(),
            min: self.min,
            max: self.max,
            count: self.count,
        }
    }
}

impl Default for RunningStats {
    fn default() -> Self {
        Self::new()
    }
}
