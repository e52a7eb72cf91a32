use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time;

use crate::ids::{DomainId, PromiseId};

/// A syscall promise packaged with the closure to run when external code
/// declares it resumable. Built with [`Scope::ready_task`] and returned by
/// an events hook's `select`.
///
/// [`Scope::ready_task`]: crate::Scope::ready_task
pub struct ReadyTask {
    pub(crate) id: PromiseId,
    pub(crate) run: Box<dyn FnOnce()>,
}

impl ReadyTask {
    pub(crate) fn new(id: PromiseId, run: Box<dyn FnOnce()>) -> Self {
        Self { id, run }
    }

    /// The syscall promise this entry resolves.
    #[must_use]
    pub fn promise_uid(&self) -> PromiseId {
        self.id
    }
}

/// Shared handle that breaks a domain out of a blocking `select`. Safe to
/// call from any domain; idempotent between consecutive selects.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Per-domain window into events the scheduler does not drive itself
/// (I/O readiness, timers). `select` runs only when the owning domain is
/// otherwise idle but still owns pending promises; it may block, bounded
/// by the interrupter the hook hands out.
pub trait EventsHook {
    /// Blocks until some suspended syscall promises can resume, returning
    /// their entries. Must return (possibly empty) after `interrupt`.
    fn select(&mut self) -> Vec<ReadyTask>;

    /// The handle other domains use to cut `select` short.
    fn interrupter(&self) -> Arc<dyn Interrupt>;

    /// Drops whatever entry the hook still holds for a cancelled syscall
    /// promise, so the registration does not outlive the promise. Hooks
    /// keeping no per-promise state ignore this; the scheduler discards
    /// entries for settled promises at maturity either way.
    fn cancel(&mut self, _id: PromiseId) {}
}

/// Builds the per-domain hook instances at pool start. Invoked on the
/// domain's own thread, so hook state may be thread-local.
pub trait EventsFactory: Send + Sync {
    fn install(&self, domain: DomainId) -> Box<dyn EventsHook>;
}

impl<F> EventsFactory for F
where
    F: Fn(DomainId) -> Box<dyn EventsHook> + Send + Sync,
{
    fn install(&self, domain: DomainId) -> Box<dyn EventsHook> {
        (self)(domain)
    }
}

/// Wakeup token bound to one domain thread. `notify` is the cross-domain
/// half: it sets the token and unparks the thread; `park` consumes the
/// token on the owning thread, returning early when one was delivered
/// while the owner was deciding to sleep.
pub struct Notifier {
    token: AtomicBool,
    thread: Mutex<Option<thread::Thread>>,
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    /// Binds the notifier to the calling thread. Must run on the owning
    /// domain before it first parks.
    pub fn bind(&self) {
        let mut slot = self.thread.lock().expect("notifier lock poisoned");
        *slot = Some(thread::current());
    }

    pub fn notify(&self) {
        self.token.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().expect("notifier lock poisoned").as_ref() {
            handle.unpark();
        }
    }

    /// Takes the pending token, if any.
    pub fn consume(&self) -> bool {
        self.token.swap(false, Ordering::SeqCst)
    }

    /// Parks the owning thread for up to `timeout`, or not at all when a
    /// token is already pending. Binds to the calling thread on first use
    /// so remote `notify` calls can unpark it.
    pub fn park(&self, timeout: time::Duration) {
        {
            let mut slot = self.thread.lock().expect("notifier lock poisoned");
            if slot.is_none() {
                *slot = Some(thread::current());
            }
        }
        if self.consume() {
            return;
        }
        thread::park_timeout(timeout);
        self.consume();
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt for Notifier {
    fn interrupt(&self) {
        self.notify();
    }
}

/// The default hook for runtimes without external events: `select` never
/// blocks and never produces entries, so the scheduler loop keeps polling
/// its inbox at the idle cadence.
pub struct NoEvents {
    interrupter: Arc<Notifier>,
}

impl NoEvents {
    #[must_use]
    pub fn new() -> Self {
        Self {
            interrupter: Arc::new(Notifier::new()),
        }
    }

    /// Factory installing a `NoEvents` hook on every domain.
    #[must_use]
    pub fn factory() -> Arc<dyn EventsFactory> {
        Arc::new(|_domain: DomainId| Box::new(NoEvents::new()) as Box<dyn EventsHook>)
    }
}

impl Default for NoEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl EventsHook for NoEvents {
    fn select(&mut self) -> Vec<ReadyTask> {
        self.interrupter.consume();
        Vec::new()
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }
}
