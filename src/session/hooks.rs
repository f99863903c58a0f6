use std::path::{Path, PathBuf};

use tracing::info;

use crate::checkpoint::{Checkpoint, CheckpointSaver};
use crate::error::Result;

use super::{SessionContext, StopSignal};

/// Callbacks run by a [`ManagedSession`](super::ManagedSession) around the training loop.
pub trait SessionHook: Send {
    fn name(&self) -> &str;

    /// Called once when the session opens, after any checkpoint restore.
    fn begin(&mut self, _ctx: &SessionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after every training iteration.
    fn after_step(&mut self, _ctx: &SessionContext<'_>, _stop: &StopSignal) -> Result<()> {
        Ok(())
    }

    /// Called once when the session is closed normally.
    fn end(&mut self, _ctx: &SessionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// True for hooks that persist checkpoints
    fn saves_checkpoints(&self) -> bool {
        false
    }
}

/// Requests a stop once the global step reaches `last_step`.
#[derive(Debug, Clone)]
pub struct StopAtStepHook {
    last_step: u64,
}

impl StopAtStepHook {
    pub fn new(last_step: u64) -> Self {
        StopAtStepHook { last_step }
    }
}

impl SessionHook for StopAtStepHook {
    fn name(&self) -> &str {
        "StopAtStepHook"
    }

    fn begin(&mut self, ctx: &SessionContext<'_>) -> Result<()> {
        if ctx.step() >= self.last_step {
            info!(step = ctx.step(), last_step = self.last_step, "Step budget already reached");
        }
        Ok(())
    }

    fn after_step(&mut self, ctx: &SessionContext<'_>, stop: &StopSignal) -> Result<()> {
        if ctx.step() >= self.last_step {
            stop.request_stop();
        }
        Ok(())
    }
}

/// Saves a checkpoint every `period` steps and once more when the session closes.
#[derive(Debug, Clone)]
pub struct CheckpointSaverHook {
    saver: CheckpointSaver,
    period: u64,
    last_saved: Option<u64>,
}

impl CheckpointSaverHook {
    pub fn new<P: AsRef<Path>>(dir: P, period: u64) -> Self {
        CheckpointSaverHook {
            saver: CheckpointSaver::new(dir),
            period: period.max(1),
            last_saved: None,
        }
    }

    pub fn with_saver(saver: CheckpointSaver, period: u64) -> Self {
        CheckpointSaverHook {
            saver,
            period: period.max(1),
            last_saved: None,
        }
    }

    pub fn dir(&self) -> PathBuf {
        self.saver.dir().to_path_buf()
    }

    fn save(&mut self, ctx: &SessionContext<'_>) -> Result<()> {
        let checkpoint = Checkpoint::capture(ctx.step(), ctx.policies(), Some(ctx.optimizer()));
        self.saver.save(&checkpoint)?;
        self.last_saved = Some(ctx.step());
        Ok(())
    }
}

impl SessionHook for CheckpointSaverHook {
    fn name(&self) -> &str {
        "CheckpointSaverHook"
    }

    fn begin(&mut self, ctx: &SessionContext<'_>) -> Result<()> {
        self.last_saved = Some(ctx.step());
        Ok(())
    }

    fn after_step(&mut self, ctx: &SessionContext<'_>, _stop: &StopSignal) -> Result<()> {
        let due = self
            .last_saved
            .map_or(true, |last| ctx.step().saturating_sub(last) >= self.period);
        if due {
            self.save(ctx)?;
        }
        Ok(())
    }

    fn end(&mut self, ctx: &SessionContext<'_>) -> Result<()> {
        if self.last_saved != Some(ctx.step()) || crate::checkpoint::latest_checkpoint(self.saver.dir())?.is_none() {
            self.save(ctx)?;
        }
        Ok(())
    }

    fn saves_checkpoints(&self) -> bool {
        true
    }
}
