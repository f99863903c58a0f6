//! Managed training session.
//!
//! [`ManagedSession`] owns the resources of one training run (the optimizer,
//! the hooks and the stop signal) for the lifetime of the loop. Opening a
//! session restores the requested checkpoint and runs every hook's `begin`;
//! [`ManagedSession::close`] runs every hook's `end` (the checkpoint saver
//! writes its final checkpoint there). A session dropped without `close`,
//! e.g. on an error path, still releases everything but skips the `end`
//! hooks, so a failed iteration is never persisted as a finished one.

pub mod hooks;

pub use hooks::{CheckpointSaverHook, SessionHook, StopAtStepHook};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::global_step::GlobalStep;
use crate::optimizer::OptimizerWrapper;
use crate::policy::PolicyHandle;

/// Cooperative stop request, checked once per training iteration.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// What hooks can see of the running session
pub struct SessionContext<'a> {
    step: u64,
    policies: &'a [PolicyHandle],
    optimizer: &'a OptimizerWrapper,
}

impl<'a> SessionContext<'a> {
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Policies persisted in checkpoints
    pub fn policies(&self) -> &'a [PolicyHandle] {
        self.policies
    }

    pub fn optimizer(&self) -> &'a OptimizerWrapper {
        self.optimizer
    }
}

/// Options for [`ManagedSession::open`]
#[derive(Default)]
pub struct SessionOptions {
    /// Checkpoint file or directory to restore; failure to restore is fatal
    pub restore_from: Option<PathBuf>,
    pub hooks: Vec<Box<dyn SessionHook>>,
    pub stop: StopSignal,
}

pub struct ManagedSession {
    global_step: GlobalStep,
    policies: Vec<PolicyHandle>,
    optimizer: OptimizerWrapper,
    hooks: Vec<Box<dyn SessionHook>>,
    stop: StopSignal,
    closed: bool,
}

impl ManagedSession {
    /// Restore state if requested, then run every hook's `begin`.
    pub fn open(
        global_step: GlobalStep,
        policies: Vec<PolicyHandle>,
        optimizer: OptimizerWrapper,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut session = ManagedSession {
            global_step,
            policies,
            optimizer,
            hooks: options.hooks,
            stop: options.stop,
            closed: false,
        };

        if let Some(path) = &options.restore_from {
            let checkpoint = Checkpoint::load(path)?;
            checkpoint.restore_into(&session.policies)?;
            session.global_step.set(checkpoint.step);
            if let Some(optimizer) = checkpoint.optimizer {
                if optimizer.name() == session.optimizer.name() {
                    session.optimizer = optimizer;
                } else {
                    warn!(
                        saved = optimizer.name(),
                        configured = session.optimizer.name(),
                        "Checkpoint optimizer differs from the configured one; starting with fresh optimizer state"
                    );
                }
            }
            info!(path = %path.display(), step = checkpoint.step, "Restored checkpoint");
        }

        if !session.hooks.iter().any(|h| h.saves_checkpoints()) {
            warn!("No checkpoint saver configured; training progress cannot be recovered after a crash");
        }

        let ctx = SessionContext {
            step: session.global_step.get(),
            policies: &session.policies,
            optimizer: &session.optimizer,
        };
        for hook in session.hooks.iter_mut() {
            hook.begin(&ctx)?;
        }
        Ok(session)
    }

    pub fn step(&self) -> u64 {
        self.global_step.get()
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_stop_requested()
    }

    pub fn optimizer(&self) -> &OptimizerWrapper {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut OptimizerWrapper {
        &mut self.optimizer
    }

    /// Run every hook's `after_step`.
    pub fn after_step(&mut self) -> Result<()> {
        let ctx = SessionContext {
            step: self.global_step.get(),
            policies: &self.policies,
            optimizer: &self.optimizer,
        };
        for hook in self.hooks.iter_mut() {
            hook.after_step(&ctx, &self.stop)?;
        }
        Ok(())
    }

    /// Run every hook's `end` and release the session.
    ///
    /// All hooks run even if one fails; the first error is returned.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        let ctx = SessionContext {
            step: self.global_step.get(),
            policies: &self.policies,
            optimizer: &self.optimizer,
        };
        let mut first_error = None;
        for hook in self.hooks.iter_mut() {
            if let Err(e) = hook.end(&ctx) {
                warn!(hook = hook.name(), "Session hook failed at close: {}", e);
                first_error.get_or_insert(e);
            }
        }
        info!(step = ctx.step, "Closed session");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(step = self.global_step.get(), "Session released without close; end hooks skipped");
        }
    }
}
