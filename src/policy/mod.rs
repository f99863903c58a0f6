//! Policy contract and the handle that binds a policy to its parameters.
//!
//! A [`Policy`] describes an architecture only: it maps a batch of
//! observations (and an optional recurrent state) to action logits and value
//! estimates for a given [`Parameters`] list, and backpropagates loss
//! gradients through the same computation. Parameter values live in a
//! [`ParameterStore`], so the same architecture can be evaluated against the
//! global and the local copy.

pub mod mlp;
pub mod recurrent;
pub mod registry;

pub use mlp::MlpPolicy;
pub use recurrent::RecurrentPolicy;
pub use registry::PolicyKind;

use std::fmt::Debug;
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::distribution::Categorical;
use crate::error::{A3cError, Result};
use crate::network::NetworkCache;
use crate::layers::DenseCache;
use crate::params::{Gradients, ParameterStore, Parameters};

/// Values saved by a forward pass for the matching backward pass
#[derive(Clone, Debug)]
pub enum PassCache {
    Mlp {
        actor: NetworkCache,
        critic: NetworkCache,
    },
    Recurrent {
        cells: Vec<DenseCache>,
        hidden: Array2<f32>,
        policy_head: DenseCache,
        value_head: DenseCache,
    },
}

/// Output of [`Policy::forward`] over a batch of `T` observations
#[derive(Clone, Debug)]
pub struct ForwardPass {
    /// `(T, num_actions)` unnormalized action log-probabilities
    pub logits: Array2<f32>,
    /// `(T,)` value estimates
    pub values: Array1<f32>,
    /// Recurrent state after the last observation, `None` for stateless policies
    pub final_state: Option<Array1<f32>>,
    pub cache: PassCache,
}

impl ForwardPass {
    pub fn distribution(&self) -> Categorical {
        Categorical::new(&self.logits)
    }
}

/// One action chosen by [`Policy::act`]
#[derive(Clone, Debug)]
pub struct ActionOutput {
    pub action: usize,
    pub value: f32,
    pub next_state: Option<Array1<f32>>,
}

/// Actor-critic policy over a discrete action space
pub trait Policy: Send + Sync + Debug {
    /// Registered type name, e.g. `"Mlp"`
    fn type_name(&self) -> &'static str;

    fn observation_size(&self) -> usize;

    fn num_actions(&self) -> usize;

    /// Fresh, randomly initialized parameters
    fn init_parameters(&self, rng: &mut dyn RngCore) -> Parameters;

    /// State at the start of an episode; `None` for stateless policies.
    fn initial_state(&self) -> Option<Array1<f32>> {
        None
    }

    /// Evaluate a batch of consecutive observations.
    ///
    /// Recurrent policies thread `state` through the rows in order.
    fn forward(
        &self,
        params: &Parameters,
        observations: ArrayView2<f32>,
        state: Option<ArrayView1<f32>>,
    ) -> Result<ForwardPass>;

    /// Gradients of a loss given dLoss/dLogits and dLoss/dValues.
    fn backward(
        &self,
        params: &Parameters,
        pass: &ForwardPass,
        logits_grad: ArrayView2<f32>,
        values_grad: ArrayView1<f32>,
    ) -> Result<Gradients>;

    /// Gradient-preprocessing hook applied before gradients reach the
    /// optimizer. Returns the global norm of the raw gradients.
    fn preprocess_gradients(&self, gradients: &mut Gradients) -> f32 {
        gradients.global_norm()
    }

    /// Pick an action for a single observation.
    fn act(
        &self,
        params: &Parameters,
        observation: ArrayView1<f32>,
        state: Option<ArrayView1<f32>>,
        rng: &mut dyn RngCore,
        deterministic: bool,
    ) -> Result<ActionOutput> {
        let batch = observation.insert_axis(Axis(0));
        let pass = self.forward(params, batch, state)?;
        let dist = pass.distribution();
        let action = if deterministic {
            dist.mode()[0]
        } else {
            dist.sample(rng)[0]
        };
        Ok(ActionOutput {
            action,
            value: pass.values[0],
            next_state: pass.final_state,
        })
    }

    /// Value estimate of a single observation.
    fn value(&self, params: &Parameters, observation: ArrayView1<f32>, state: Option<ArrayView1<f32>>) -> Result<f32> {
        let pass = self.forward(params, observation.insert_axis(Axis(0)), state)?;
        Ok(pass.values[0])
    }
}

/// Checks shared by the built-in policies
pub(crate) fn check_observations(policy: &dyn Policy, observations: ArrayView2<f32>) -> Result<()> {
    if observations.nrows() == 0 {
        return Err(A3cError::EmptyTrajectory);
    }
    if observations.ncols() != policy.observation_size() {
        return Err(A3cError::dimension_mismatch(
            format!("{} observation features", policy.observation_size()),
            format!("{} observation features", observations.ncols()),
        ));
    }
    Ok(())
}

/// A named policy bound to a parameter store.
///
/// Cloning a handle aliases the same store; [`PolicyHandle::local_copy`]
/// creates an independent store initialized from this one.
#[derive(Clone, Debug)]
pub struct PolicyHandle {
    name: String,
    policy: Arc<dyn Policy>,
    store: ParameterStore,
}

impl PolicyHandle {
    /// Bind `policy` to freshly initialized parameters.
    pub fn new<S: Into<String>, R: Rng>(name: S, policy: Arc<dyn Policy>, rng: &mut R) -> Self {
        let params = policy.init_parameters(rng);
        PolicyHandle {
            name: name.into(),
            policy,
            store: ParameterStore::new(params),
        }
    }

    /// Bind `policy` to existing values; the layout must match the architecture.
    pub fn from_parameters<S: Into<String>>(name: S, policy: Arc<dyn Policy>, params: Parameters) -> Result<Self> {
        let reference = policy.init_parameters(&mut StdRng::seed_from_u64(0));
        reference.check_compatible(&params)?;
        Ok(PolicyHandle {
            name: name.into(),
            policy,
            store: ParameterStore::new(params),
        })
    }

    /// Same architecture, separate store holding a copy of the current values.
    pub fn local_copy<S: Into<String>>(&self, name: S) -> Self {
        PolicyHandle {
            name: name.into(),
            policy: Arc::clone(&self.policy),
            store: ParameterStore::new(self.store.snapshot()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn parameters(&self) -> Parameters {
        self.store.snapshot()
    }

    /// True when both handles share one parameter store
    pub fn shares_parameters(&self, other: &PolicyHandle) -> bool {
        self.store.ptr_eq(&other.store)
    }

    /// Act against the current values, holding the read lock for one forward pass.
    pub fn act<R: Rng>(
        &self,
        observation: ArrayView1<f32>,
        state: Option<ArrayView1<f32>>,
        rng: &mut R,
        deterministic: bool,
    ) -> Result<ActionOutput> {
        let params = self.store.read();
        self.policy.act(&params, observation, state, rng, deterministic)
    }

    pub fn value(&self, observation: ArrayView1<f32>, state: Option<ArrayView1<f32>>) -> Result<f32> {
        let params = self.store.read();
        self.policy.value(&params, observation, state)
    }
}
