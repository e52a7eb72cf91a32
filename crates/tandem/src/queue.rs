use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::events::ReadyTask;
use crate::ids::PromiseId;

/// An entry the scheduler loop can execute.
pub(crate) enum Runnable {
    /// Resume (or start) a task continuation.
    Task(PromiseId),
    /// Complete a syscall promise handed back by the events hook.
    Syscall(ReadyTask),
}

/// Per-domain set of ready entries.
///
/// Extraction is uniformly random over the current entries, drawn from the
/// domain's seeded generator; no FIFO ordering is exposed, so tasks cannot
/// grow implicit priority assumptions.
pub(crate) struct RunQueue {
    entries: Vec<Runnable>,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: Runnable) {
        self.entries.push(entry);
    }

    /// Removes one entry at random, or `None` when the queue is empty.
    pub(crate) fn take_random(&mut self, rng: &mut ChaCha8Rng) -> Option<Runnable> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.entries.len());
        Some(self.entries.swap_remove(index))
    }
}
