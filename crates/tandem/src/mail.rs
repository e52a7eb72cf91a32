use std::sync::{Arc, OnceLock};

use concurrent_queue::ConcurrentQueue;

use crate::events::{Interrupt, Notifier};
use crate::ids::{DomainId, PromiseId};
use crate::step::RawOutcome;

/// Cross-domain messages. These are the only state mutations that cross a
/// domain boundary, and both are applied by the receiving domain itself
/// when it drains its inbox.
#[derive(Debug)]
pub(crate) enum Mail {
    /// A worker finished (or cancelled) a parallel task whose await-side
    /// record lives on the receiving domain.
    Outcome {
        child: PromiseId,
        outcome: RawOutcome,
    },
    /// The origin domain cancelled a parallel task adopted by the
    /// receiving domain; the whole local subtree under `root` goes down.
    CancelTree { root: PromiseId },
}

/// One domain's shared endpoints: its inbox, its scheduler wakeup token,
/// and the interrupter of its events hook (published once the domain
/// thread has installed the hook).
pub(crate) struct DomainLink {
    pub(crate) id: DomainId,
    inbox: Arc<ConcurrentQueue<Mail>>,
    pub(crate) notifier: Arc<Notifier>,
    hook_interrupt: OnceLock<Arc<dyn Interrupt>>,
}

impl DomainLink {
    pub(crate) fn new(id: DomainId) -> Self {
        Self {
            id,
            inbox: Arc::new(ConcurrentQueue::unbounded()),
            notifier: Arc::new(Notifier::new()),
            hook_interrupt: OnceLock::new(),
        }
    }

    pub(crate) fn inbox(&self) -> Arc<ConcurrentQueue<Mail>> {
        self.inbox.clone()
    }

    pub(crate) fn publish_interrupter(&self, interrupter: Arc<dyn Interrupt>) {
        let _ = self.hook_interrupt.set(interrupter);
    }

    /// Delivers mail and wakes the domain, whether it is parked in its
    /// scheduler loop or blocked inside its events hook.
    pub(crate) fn post(&self, mail: Mail) {
        self.inbox.push(mail).expect("domain inbox should stay open");
        self.wake();
    }

    pub(crate) fn wake(&self) {
        if let Some(interrupter) = self.hook_interrupt.get() {
            interrupter.interrupt();
        }
        self.notifier.notify();
    }
}

/// Shared map of every domain's endpoints, indexed by domain id.
pub(crate) type Directory = Arc<Vec<DomainLink>>;
