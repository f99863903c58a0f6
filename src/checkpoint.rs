//! Checkpoint save/restore.
//!
//! A checkpoint is a bincode file `model.ckpt-<step>.bin` holding the step
//! counter, the parameters of every saved policy keyed by policy name and,
//! optionally, the optimizer state. A text file named `checkpoint` next to
//! the checkpoint files names the newest one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{A3cError, Result};
use crate::optimizer::OptimizerWrapper;
use crate::params::Parameters;
use crate::policy::PolicyHandle;

/// Name of the pointer file naming the latest checkpoint in a directory
pub const POINTER_FILE: &str = "checkpoint";
/// Checkpoints kept by [`CheckpointSaver`] unless configured otherwise
pub const DEFAULT_MAX_TO_KEEP: usize = 5;

const PREFIX: &str = "model.ckpt-";
const SUFFIX: &str = ".bin";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u64,
    pub policies: BTreeMap<String, Parameters>,
    pub optimizer: Option<OptimizerWrapper>,
}

impl Checkpoint {
    /// Snapshot the given policies (each under its own read lock).
    pub fn capture(step: u64, policies: &[PolicyHandle], optimizer: Option<&OptimizerWrapper>) -> Self {
        Checkpoint {
            step,
            policies: policies
                .iter()
                .map(|p| (p.name().to_string(), p.parameters()))
                .collect(),
            optimizer: optimizer.cloned(),
        }
    }

    /// Parameters saved under `name`
    pub fn policy(&self, name: &str) -> Result<&Parameters> {
        self.policies.get(name).ok_or_else(|| {
            A3cError::Checkpoint(format!(
                "no policy named '{}' in checkpoint (saved: {})",
                name,
                self.policies.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Load the saved values into each policy's store. Every policy must be present.
    pub fn restore_into(&self, policies: &[PolicyHandle]) -> Result<()> {
        for policy in policies {
            let params = self.policy(policy.name())?;
            policy
                .store()
                .load(params)
                .map_err(|e| A3cError::Checkpoint(format!("cannot restore '{}': {}", policy.name(), e)))?;
        }
        Ok(())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a checkpoint from a file, or from the newest checkpoint of a directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = if path.is_dir() {
            latest_checkpoint(path)?
                .ok_or_else(|| A3cError::Checkpoint(format!("no checkpoint found in {}", path.display())))?
        } else {
            path.to_path_buf()
        };
        let bytes = fs::read(&file)
            .map_err(|e| A3cError::Checkpoint(format!("cannot read {}: {}", file.display(), e)))?;
        let checkpoint: Checkpoint = bincode::deserialize(&bytes)
            .map_err(|e| A3cError::Checkpoint(format!("corrupt checkpoint {}: {}", file.display(), e)))?;
        debug!(path = %file.display(), step = checkpoint.step, "Read checkpoint");
        Ok(checkpoint)
    }
}

/// File name of the checkpoint for `step`
pub fn checkpoint_file_name(step: u64) -> String {
    format!("{}{}{}", PREFIX, step, SUFFIX)
}

fn parse_step(file_name: &str) -> Option<u64> {
    file_name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?.parse().ok()
}

/// Path of the newest checkpoint in `dir`, via the pointer file.
///
/// Falls back to the highest step among the checkpoint files when the
/// pointer is missing.
pub fn latest_checkpoint<P: AsRef<Path>>(dir: P) -> Result<Option<PathBuf>> {
    let dir = dir.as_ref();
    let pointer = dir.join(POINTER_FILE);
    if pointer.is_file() {
        let name = fs::read_to_string(&pointer)?;
        let candidate = dir.join(name.trim());
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(list_checkpoints(dir)?.pop().map(|(_, path)| path))
}

/// Checkpoint files of `dir` sorted by step
fn list_checkpoints(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(step) = entry.file_name().to_str().and_then(parse_step) {
            found.push((step, entry.path()));
        }
    }
    found.sort_by_key(|(step, _)| *step);
    Ok(found)
}

/// Writes checkpoints into one directory and prunes old ones.
#[derive(Clone, Debug)]
pub struct CheckpointSaver {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointSaver {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CheckpointSaver {
            dir: dir.as_ref().to_path_buf(),
            max_to_keep: DEFAULT_MAX_TO_KEEP,
        }
    }

    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `checkpoint`, point the pointer file at it and prune old files.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let name = checkpoint_file_name(checkpoint.step);
        let path = self.dir.join(&name);
        checkpoint.write_to(&path)?;
        fs::write(self.dir.join(POINTER_FILE), format!("{}\n", name))?;

        let existing = list_checkpoints(&self.dir)?;
        if existing.len() > self.max_to_keep {
            for (_, old) in &existing[..existing.len() - self.max_to_keep] {
                fs::remove_file(old)?;
            }
        }
        info!(step = checkpoint.step, path = %path.display(), "Saved checkpoint");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Adam;
    use crate::policy::{MlpPolicy, Policy};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn handle(name: &str, seed: u64) -> PolicyHandle {
        let policy: Arc<dyn Policy> = Arc::new(MlpPolicy::new(3, 2, &[4]).unwrap());
        PolicyHandle::new(name, policy, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_save_restore_round_trip() {
        let dir = tempdir().unwrap();
        let saved = handle("MlpPolicy_global", 1);
        let ckpt = Checkpoint::capture(1234, &[saved.clone()], Some(&OptimizerWrapper::Adam(Adam::default())));
        let path = CheckpointSaver::new(dir.path()).save(&ckpt).unwrap();
        assert!(path.ends_with("model.ckpt-1234.bin"));

        let restored = handle("MlpPolicy_global", 2);
        assert_ne!(restored.parameters(), saved.parameters());
        let loaded = Checkpoint::load(dir.path()).unwrap();
        loaded.restore_into(&[restored.clone()]).unwrap();
        assert_eq!(loaded.step, 1234);
        assert_eq!(restored.parameters(), saved.parameters());
        assert!(matches!(loaded.optimizer, Some(OptimizerWrapper::Adam(_))));
    }

    #[test]
    fn test_keeps_last_five() {
        let dir = tempdir().unwrap();
        let saver = CheckpointSaver::new(dir.path());
        let policy = handle("p", 0);
        for step in 1..=7u64 {
            saver.save(&Checkpoint::capture(step * 10, &[policy.clone()], None)).unwrap();
        }
        let steps: Vec<u64> = list_checkpoints(dir.path()).unwrap().into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![30, 40, 50, 60, 70]);
        assert_eq!(latest_checkpoint(dir.path()).unwrap().unwrap(), dir.path().join("model.ckpt-70.bin"));
    }

    #[test]
    fn test_missing_or_corrupt_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(Checkpoint::load(dir.path()), Err(A3cError::Checkpoint(_))));
        let bad = dir.path().join("model.ckpt-5.bin");
        fs::write(&bad, b"not a checkpoint").unwrap();
        assert!(matches!(Checkpoint::load(&bad), Err(A3cError::Checkpoint(_))));
    }

    #[test]
    fn test_restore_requires_named_policy() {
        let ckpt = Checkpoint::capture(0, &[handle("a", 0)], None);
        assert!(ckpt.restore_into(&[handle("b", 0)]).is_err());
    }
}
