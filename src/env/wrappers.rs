use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{A3cError, Result};

use super::{Environment, Step};

/// File written by [`RecordingEnv`] inside its directory
pub const RECORDING_FILE: &str = "episodes.jsonl";

/// One finished episode as written by [`RecordingEnv`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub env_id: String,
    pub episode: usize,
    pub length: usize,
    pub total_reward: f32,
    pub actions: Vec<usize>,
}

/// Wrapper that appends a JSON line per finished episode to `dir/episodes.jsonl`.
pub struct RecordingEnv<E: Environment> {
    inner: E,
    path: PathBuf,
    writer: BufWriter<File>,
    episode: usize,
    actions: Vec<usize>,
    total_reward: f32,
}

impl<E: Environment> RecordingEnv<E> {
    pub fn new<P: AsRef<Path>>(inner: E, dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(RECORDING_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RecordingEnv {
            inner,
            path,
            writer: BufWriter::new(file),
            episode: 0,
            actions: Vec::new(),
            total_reward: 0.0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    fn finish_episode(&mut self) -> Result<()> {
        let record = EpisodeRecord {
            env_id: self.inner.id().to_string(),
            episode: self.episode,
            length: self.actions.len(),
            total_reward: self.total_reward,
            actions: std::mem::take(&mut self.actions),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        debug!(episode = record.episode, path = %self.path.display(), "Recorded episode");
        self.episode += 1;
        self.total_reward = 0.0;
        Ok(())
    }
}

/// Read back every record of a recording directory.
pub fn read_recording<P: AsRef<Path>>(dir: P) -> Result<Vec<EpisodeRecord>> {
    let contents = fs::read_to_string(dir.as_ref().join(RECORDING_FILE))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(A3cError::from))
        .collect()
}

impl<E: Environment> Environment for RecordingEnv<E> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn observation_size(&self) -> usize {
        self.inner.observation_size()
    }

    fn num_actions(&self) -> usize {
        self.inner.num_actions()
    }

    fn reset(&mut self) -> Result<Array1<f32>> {
        self.actions.clear();
        self.total_reward = 0.0;
        self.inner.reset()
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        let step = self.inner.step(action)?;
        self.actions.push(action);
        self.total_reward += step.reward;
        if step.done {
            self.finish_episode()?;
        }
        Ok(step)
    }

    fn render(&mut self) -> Result<()> {
        self.inner.render()
    }

    fn seed(&mut self, seed: u64) {
        self.inner.seed(seed)
    }
}
