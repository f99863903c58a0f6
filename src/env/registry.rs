use crate::error::{A3cError, Result};

use super::{CartPole, Corridor, Environment};

type EnvConstructor = fn() -> Result<Box<dyn Environment>>;

const REGISTRY: &[(&str, EnvConstructor)] = &[
    ("CartPole-v0", cartpole_v0),
    ("CartPole-v1", cartpole_v1),
    ("Corridor-v0", corridor_v0),
];

fn cartpole_v0() -> Result<Box<dyn Environment>> {
    Ok(Box::new(CartPole::with_max_steps(200)))
}

fn cartpole_v1() -> Result<Box<dyn Environment>> {
    Ok(Box::new(CartPole::with_max_steps(500)))
}

fn corridor_v0() -> Result<Box<dyn Environment>> {
    Ok(Box::new(Corridor::new(5, 20)?))
}

/// Ids accepted by [`make_env`]
pub fn registered_envs() -> Vec<&'static str> {
    REGISTRY.iter().map(|(id, _)| *id).collect()
}

/// Create a registered environment by id.
pub fn make_env(id: &str) -> Result<Box<dyn Environment>> {
    REGISTRY
        .iter()
        .find(|(name, _)| *name == id)
        .ok_or_else(|| A3cError::UnknownEnvironment {
            id: id.to_string(),
            known: registered_envs().join(", "),
        })
        .and_then(|(_, constructor)| constructor())
}
