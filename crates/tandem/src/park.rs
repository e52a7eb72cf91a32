// Thread parking primitives for quiescent domains and pool teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time;

/// State of a [`Gate`], tracked under its mutex so a sleeping thread can
/// never miss a release that raced with its decision to sleep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum GateState {
    Open,
    Held,
    Released,
}

/// Condvar latch a quiescent domain sleeps on while waiting for parallel
/// submissions or the kill signal.
///
/// A sleeper first takes the latch with [`Gate::try_hold`], re-checks its
/// wake conditions, then parks in [`Gate::wait`]. A release that lands
/// between the two steps leaves the gate in `Released`, which `wait`
/// observes without sleeping.
pub(crate) struct Gate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Open),
            cond: Condvar::new(),
        }
    }

    /// Takes the latch if it is not already held. Returns whether this
    /// caller took it.
    pub(crate) fn try_hold(&self) -> bool {
        let mut state = self.state.lock().expect("gate lock poisoned");
        if *state == GateState::Held {
            return false;
        }
        *state = GateState::Held;
        true
    }

    /// Wakes every sleeper and leaves the gate released for late arrivals.
    pub(crate) fn open_all(&self) {
        let mut state = self.state.lock().expect("gate lock poisoned");
        *state = GateState::Released;
        drop(state);
        self.cond.notify_all();
    }

    /// Blocks the caller until the gate is released. Every sleeper wakes
    /// on a release: the first to run consumes it, the rest observe the
    /// consumed state and return too, so callers must re-check their wake
    /// conditions. Returns immediately when the gate is not held.
    pub(crate) fn wait(&self) {
        let mut state = self.state.lock().expect("gate lock poisoned");
        loop {
            match *state {
                GateState::Open => return,
                GateState::Released => {
                    *state = GateState::Open;
                    return;
                }
                GateState::Held => {
                    state = self.cond.wait(state).expect("gate lock poisoned");
                }
            }
        }
    }
}

/// One-way teardown flag shared by the whole pool.
pub(crate) struct KillSignal {
    raised: AtomicBool,
}

impl KillSignal {
    pub(crate) fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Raises the signal. Returns whether this caller flipped it.
    pub(crate) fn raise(&self) -> bool {
        self.raised
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

/// Bounded exponential backoff for scheduler iterations that found no
/// runnable work but must keep polling (pending promises with a
/// non-blocking events hook, inbox traffic).
pub(crate) struct IdleStrategy {
    base: time::Duration,
    cap: time::Duration,
}

impl IdleStrategy {
    pub(crate) fn new(base: time::Duration, cap: time::Duration) -> Self {
        Self { base, cap }
    }

    /// Pause recommended after `round` consecutive idle iterations.
    pub(crate) fn delay(&self, round: u32) -> time::Duration {
        let shift = round.min(10);
        let scaled = self.base.saturating_mul(1u32 << shift);
        scaled.min(self.cap)
    }
}

/// Runs the wrapped closure when dropped, unless disarmed.
pub(crate) struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> OnDrop<F> {
    pub(crate) fn new(action: F) -> Self {
        Self(Some(action))
    }
}

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(action) = self.0.take() {
            action();
        }
    }
}
