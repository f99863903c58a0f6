use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{A3cError, Result};

use super::{MlpPolicy, Policy, RecurrentPolicy};

/// Hidden layer sizes of the built-in feed-forward policy
pub const DEFAULT_MLP_HIDDEN: [usize; 2] = [64, 64];
/// State size of the built-in recurrent policy
pub const DEFAULT_RECURRENT_HIDDEN: usize = 64;

/// Registered policy types, resolved by name at configuration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    Mlp,
    Recurrent,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 2] = [PolicyKind::Mlp, PolicyKind::Recurrent];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Mlp => "Mlp",
            PolicyKind::Recurrent => "Recurrent",
        }
    }

    /// Look up a policy type. Matching ignores case and an optional
    /// `Policy` suffix, so `"mlp"` and `"MlpPolicy"` both resolve.
    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_ascii_lowercase();
        let key = lower.strip_suffix("policy").unwrap_or(lower.as_str());
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().to_ascii_lowercase() == key)
            .ok_or_else(|| A3cError::UnknownPolicy {
                name: name.to_string(),
                known: Self::ALL.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", "),
            })
    }

    /// Name under which training stores the global policy, e.g. `MlpPolicy_global`
    pub fn default_global_name(&self) -> String {
        format!("{}Policy_global", self.as_str())
    }

    pub fn default_local_name(&self) -> String {
        format!("{}Policy_local", self.as_str())
    }

    /// Build the default architecture of this type for an environment.
    pub fn build(&self, observation_size: usize, num_actions: usize) -> Result<Arc<dyn Policy>> {
        let policy: Arc<dyn Policy> = match self {
            PolicyKind::Mlp => Arc::new(MlpPolicy::new(observation_size, num_actions, &DEFAULT_MLP_HIDDEN)?),
            PolicyKind::Recurrent => Arc::new(RecurrentPolicy::new(
                observation_size,
                num_actions,
                DEFAULT_RECURRENT_HIDDEN,
            )?),
        };
        Ok(policy)
    }
}

impl FromStr for PolicyKind {
    type Err = A3cError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyKind::from_name(s)
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
