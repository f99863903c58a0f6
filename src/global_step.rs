use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Training step counter shared by the trainer, the producer and the hooks.
///
/// Counts environment timesteps. Only the trainer advances it.
#[derive(Clone, Debug, Default)]
pub struct GlobalStep {
    value: Arc<AtomicU64>,
}

impl GlobalStep {
    pub fn new(initial: u64) -> Self {
        GlobalStep {
            value: Arc::new(AtomicU64::new(initial)),
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Add `timesteps` and return the new value.
    pub fn advance(&self, timesteps: u64) -> u64 {
        self.value.fetch_add(timesteps, Ordering::SeqCst) + timesteps
    }

    /// Overwrite the counter (checkpoint restore).
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }
}
