//! Policy parameters and the shared parameter store.
//!
//! A policy's trainable variables are an ordered list of dense blocks
//! (weight matrix + bias vector). Gradients have exactly the same layout,
//! so a gradient and its target variable are paired by position.
//!
//! [`ParameterStore`] is the only way to share parameters between threads.
//! It exposes two mutating operations, both taken under the store's write
//! lock so no reader ever observes a half-applied update:
//!
//! - [`ParameterStore::sync_from`] copies every parameter of another store
//!   (global → local synchronization)
//! - [`ParameterStore::apply_gradients`] runs one optimizer step
//!
//! Two handles built from the same store (`Clone`) alias the same values;
//! that is how "no separate local policy" is expressed.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

use crate::error::{A3cError, Result};
use crate::optimizer::{Optimizer, OptimizerWrapper};

/// Weights and biases of one dense block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenseParams {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

impl DenseParams {
    pub fn new(weights: Array2<f32>, biases: Array1<f32>) -> Self {
        DenseParams { weights, biases }
    }

    pub fn zeros(input_size: usize, output_size: usize) -> Self {
        DenseParams {
            weights: Array2::zeros((input_size, output_size)),
            biases: Array1::zeros(output_size),
        }
    }

    pub fn zeros_like(other: &DenseParams) -> Self {
        DenseParams {
            weights: Array2::zeros(other.weights.dim()),
            biases: Array1::zeros(other.biases.dim()),
        }
    }

    /// Sum of squares of every element
    pub fn norm_sq(&self) -> f32 {
        self.weights.iter().map(|&x| x * x).sum::<f32>()
            + self.biases.iter().map(|&x| x * x).sum::<f32>()
    }

    pub fn same_shape(&self, other: &DenseParams) -> bool {
        self.weights.dim() == other.weights.dim() && self.biases.dim() == other.biases.dim()
    }

    pub fn num_elements(&self) -> usize {
        self.weights.len() + self.biases.len()
    }
}

/// Ordered, named list of trainable blocks of one policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    names: Vec<String>,
    blocks: Vec<DenseParams>,
}

impl Parameters {
    pub fn new() -> Self {
        Parameters {
            names: Vec::new(),
            blocks: Vec::new(),
        }
    }

    pub fn push<S: Into<String>>(&mut self, name: S, block: DenseParams) {
        self.names.push(name.into());
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn blocks(&self) -> &[DenseParams] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [DenseParams] {
        &mut self.blocks
    }

    pub fn num_elements(&self) -> usize {
        self.blocks.iter().map(DenseParams::num_elements).sum()
    }

    /// Global L2 norm over all blocks
    pub fn global_norm(&self) -> f32 {
        self.blocks.iter().map(DenseParams::norm_sq).sum::<f32>().sqrt()
    }

    /// Check that `other` has the same block names and shapes
    pub fn check_compatible(&self, other: &Parameters) -> Result<()> {
        if self.len() != other.len() {
            return Err(A3cError::dimension_mismatch(
                format!("{} parameter blocks", self.len()),
                format!("{} parameter blocks", other.len()),
            ));
        }
        for (i, (a, b)) in self.blocks.iter().zip(&other.blocks).enumerate() {
            if self.names[i] != other.names[i] || !a.same_shape(b) {
                return Err(A3cError::dimension_mismatch(
                    format!("{} {:?}/{:?}", self.names[i], a.weights.dim(), a.biases.dim()),
                    format!("{} {:?}/{:?}", other.names[i], b.weights.dim(), b.biases.dim()),
                ));
            }
        }
        Ok(())
    }

    /// Element-wise copy of `source` into `self` without reallocating.
    fn assign(&mut self, source: &Parameters) -> Result<()> {
        self.check_compatible(source)?;
        for (dst, src) in self.blocks.iter_mut().zip(&source.blocks) {
            dst.weights.assign(&src.weights);
            dst.biases.assign(&src.biases);
        }
        Ok(())
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Gradients of a loss with respect to a [`Parameters`] list, same layout.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    blocks: Vec<DenseParams>,
}

impl Gradients {
    pub fn zeros_like(params: &Parameters) -> Self {
        Gradients {
            blocks: params.blocks().iter().map(DenseParams::zeros_like).collect(),
        }
    }

    pub fn from_blocks(blocks: Vec<DenseParams>) -> Self {
        Gradients { blocks }
    }

    pub fn blocks(&self) -> &[DenseParams] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [DenseParams] {
        &mut self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Add `block` into slot `index`.
    pub fn accumulate(&mut self, index: usize, block: &DenseParams) {
        let slot = &mut self.blocks[index];
        slot.weights += &block.weights;
        slot.biases += &block.biases;
    }

    pub fn global_norm(&self) -> f32 {
        self.blocks.iter().map(DenseParams::norm_sq).sum::<f32>().sqrt()
    }

    pub fn scale(&mut self, factor: f32) {
        for block in &mut self.blocks {
            block.weights.mapv_inplace(|g| g * factor);
            block.biases.mapv_inplace(|g| g * factor);
        }
    }

    pub fn is_finite(&self) -> bool {
        self.blocks.iter().all(|b| {
            b.weights.iter().all(|g| g.is_finite()) && b.biases.iter().all(|g| g.is_finite())
        })
    }
}

/// Lock-guarded parameter values shared between the trainer and the producer.
#[derive(Clone)]
pub struct ParameterStore {
    inner: Arc<RwLock<Parameters>>,
}

impl ParameterStore {
    pub fn new(params: Parameters) -> Self {
        ParameterStore {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    /// Shared read access. Hold the guard only for the duration of one computation.
    pub fn read(&self) -> RwLockReadGuard<'_, Parameters> {
        self.inner.read()
    }

    /// Owned copy of the current values
    pub fn snapshot(&self) -> Parameters {
        self.inner.read().clone()
    }

    /// True when both handles refer to the same underlying values
    pub fn ptr_eq(&self, other: &ParameterStore) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy every parameter of `source` into this store as one atomic step.
    ///
    /// A no-op when both handles alias the same store.
    pub fn sync_from(&self, source: &ParameterStore) -> Result<()> {
        if self.ptr_eq(source) {
            return Ok(());
        }
        let src = source.inner.read();
        let mut dst = self.inner.write();
        dst.assign(&src)
    }

    /// Replace the values with `params` (checkpoint restore). Shapes must match.
    pub fn load(&self, params: &Parameters) -> Result<()> {
        let mut dst = self.inner.write();
        dst.assign(params)
    }

    /// Apply one optimizer step to all parameters as one atomic update.
    ///
    /// Gradients are paired with parameters by position.
    pub fn apply_gradients(
        &self,
        gradients: &Gradients,
        optimizer: &mut OptimizerWrapper,
        learning_rate: f32,
    ) -> Result<()> {
        let mut params = self.inner.write();
        if gradients.len() != params.len() {
            return Err(A3cError::dimension_mismatch(
                format!("{} gradient blocks", params.len()),
                format!("{} gradient blocks", gradients.len()),
            ));
        }
        for (i, (p, g)) in params.blocks().iter().zip(gradients.blocks()).enumerate() {
            if !p.same_shape(g) {
                return Err(A3cError::dimension_mismatch(
                    format!("{} {:?}", params.names()[i], p.weights.dim()),
                    format!("gradient {:?}", g.weights.dim()),
                ));
            }
        }
        optimizer.apply_gradients(params.blocks_mut(), gradients.blocks(), learning_rate);
        Ok(())
    }
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params = self.inner.read();
        f.debug_struct("ParameterStore")
            .field("blocks", &params.names())
            .field("num_elements", &params.num_elements())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Sgd;
    use ndarray::{arr1, arr2};

    fn params(scale: f32) -> Parameters {
        let mut p = Parameters::new();
        p.push("dense_0", DenseParams::new(arr2(&[[1.0, 2.0], [3.0, 4.0]]) * scale, arr1(&[0.5, -0.5]) * scale));
        p.push("dense_1", DenseParams::new(arr2(&[[1.0], [-1.0]]) * scale, arr1(&[0.0]) * scale));
        p
    }

    #[test]
    fn test_sync_copies_all_blocks() {
        let global = ParameterStore::new(params(1.0));
        let local = ParameterStore::new(params(0.0));
        local.sync_from(&global).unwrap();
        assert_eq!(*local.read(), *global.read());
    }

    #[test]
    fn test_sync_with_self_is_noop() {
        let store = ParameterStore::new(params(1.0));
        let alias = store.clone();
        alias.sync_from(&store).unwrap();
        assert!(alias.ptr_eq(&store));
    }

    #[test]
    fn test_sync_rejects_incompatible_layout() {
        let global = ParameterStore::new(params(1.0));
        let mut other = Parameters::new();
        other.push("dense_0", DenseParams::zeros(3, 2));
        let local = ParameterStore::new(other);
        assert!(matches!(local.sync_from(&global), Err(A3cError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_apply_gradients_updates_in_place() {
        let store = ParameterStore::new(params(1.0));
        let mut grads = Gradients::zeros_like(&store.read());
        grads.blocks_mut()[1].biases[0] = 2.0;
        let mut opt = OptimizerWrapper::Sgd(Sgd::new());
        store.apply_gradients(&grads, &mut opt, 0.5).unwrap();
        assert_eq!(store.read().blocks()[1].biases[0], -1.0);
        assert_eq!(store.read().blocks()[0], params(1.0).blocks()[0]);
    }

    #[test]
    fn test_global_norm() {
        let mut p = Parameters::new();
        p.push("a", DenseParams::new(arr2(&[[3.0]]), arr1(&[0.0])));
        p.push("b", DenseParams::new(arr2(&[[0.0]]), arr1(&[4.0])));
        assert!((p.global_norm() - 5.0).abs() < 1e-6);
    }
}
