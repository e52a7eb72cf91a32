use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::dispatch::JobFlags;
use crate::errors::RuntimeError;
use crate::ids::{DomainId, PromiseId};
use crate::step::{RawCont, RawOutcome, RawWaitCont, WaitPayload};
use crate::types::BoxedValue;

/// Typed handle to an eventual outcome.
///
/// The handle is deliberately not `Clone`: a promise may be awaited at
/// most once, and consuming constructors (`Step::await_on` and friends)
/// take the handle by value.
pub struct Promise<T> {
    id: PromiseId,
    origin: DomainId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Promise<T> {
    pub(crate) fn new(id: PromiseId, origin: DomainId) -> Self {
        Self {
            id,
            origin,
            _marker: PhantomData,
        }
    }

    /// The stable process-wide identity of this promise.
    #[must_use]
    pub fn uid(&self) -> PromiseId {
        self.id
    }

    /// The domain the promise was created on, which is also the only
    /// domain allowed to await or cancel it.
    #[must_use]
    pub fn origin(&self) -> DomainId {
        self.origin
    }
}

impl<T> core::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Promise({}, {})", self.id, self.origin)
    }
}

/// Lifecycle of a promise record. `Pending` is left at most once; a
/// consumed record is removed from the registry right after.
pub(crate) enum PromiseState {
    Pending,
    Resolved(BoxedValue),
    Failed(RuntimeError),
    Cancelled,
    Consumed,
}

impl PromiseState {
    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

/// What backs a promise on this domain.
pub(crate) enum Kind {
    /// A task with a runnable closure, executed on this domain.
    Task,
    /// Resolved by external code through the events hook.
    Syscall,
    /// Await-side record of a parallel task executing on another domain.
    /// The shared flags stop an unadopted job and name its adopter.
    Remote { flags: Arc<JobFlags> },
}

/// What a parked task is waiting on, with its stored continuation.
pub(crate) struct WaitState {
    pub(crate) mode: WaitMode,
    pub(crate) cont: RawWaitCont,
}

pub(crate) enum WaitMode {
    One {
        target: PromiseId,
    },
    All {
        targets: Vec<PromiseId>,
        slots: Vec<Option<RawOutcome>>,
        remaining: usize,
    },
    First {
        targets: Vec<PromiseId>,
    },
}

impl WaitMode {
    /// Every promise id this wait is registered on.
    pub(crate) fn targets(&self) -> &[PromiseId] {
        match self {
            WaitMode::One { target } => core::slice::from_ref(target),
            WaitMode::All { targets, .. } | WaitMode::First { targets } => targets,
        }
    }
}

/// A task ready to run: either its next plain continuation, or a wait
/// continuation whose payload has been delivered.
pub(crate) enum ResumeCell {
    Start(RawCont),
    Waited(RawWaitCont, WaitPayload),
}

pub(crate) struct PromiseRecord {
    pub(crate) kind: Kind,
    pub(crate) state: PromiseState,
    pub(crate) parent: Option<PromiseId>,
    pub(crate) children: Vec<PromiseId>,
    pub(crate) awaiter: Option<PromiseId>,
    pub(crate) cancel_requested: bool,
    pub(crate) resume: Option<ResumeCell>,
    pub(crate) wait: Option<WaitState>,
    /// Outcome held back while pending children are cancelled and
    /// awaited; the promise leaves `Pending` only after they are done.
    pub(crate) winding: Option<RawOutcome>,
    /// Value producer of a syscall promise, run on resolution.
    pub(crate) on_resolve: Option<Box<dyn FnOnce() -> BoxedValue>>,
    /// Set on an adopted parallel root: the domain its outcome is posted
    /// back to.
    pub(crate) report_to: Option<DomainId>,
}

impl PromiseRecord {
    fn blank(kind: Kind, parent: Option<PromiseId>) -> Self {
        Self {
            kind,
            parent,
            state: PromiseState::Pending,
            children: Vec::new(),
            awaiter: None,
            cancel_requested: false,
            resume: None,
            wait: None,
            winding: None,
            on_resolve: None,
            report_to: None,
        }
    }

    pub(crate) fn task(parent: Option<PromiseId>, body: RawCont) -> Self {
        let mut record = Self::blank(Kind::Task, parent);
        record.resume = Some(ResumeCell::Start(body));
        record
    }

    pub(crate) fn syscall(
        parent: Option<PromiseId>,
        on_resolve: Box<dyn FnOnce() -> BoxedValue>,
    ) -> Self {
        let mut record = Self::blank(Kind::Syscall, parent);
        record.on_resolve = Some(on_resolve);
        record
    }

    pub(crate) fn remote(parent: Option<PromiseId>, flags: Arc<JobFlags>) -> Self {
        Self::blank(Kind::Remote { flags }, parent)
    }

    pub(crate) fn adopted(body: RawCont, origin: DomainId) -> Self {
        let mut record = Self::blank(Kind::Task, None);
        record.resume = Some(ResumeCell::Start(body));
        record.report_to = Some(origin);
        record
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state.is_pending()
    }
}

/// Domain-local slice of the promise registry: every record owned by the
/// executing domain, keyed by promise id.
pub(crate) struct Registry {
    records: HashMap<PromiseId, PromiseRecord>,
    pending: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            pending: 0,
        }
    }

    /// Number of records still in `Pending`; zero means the domain is
    /// eligible for quiescence.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending
    }

    pub(crate) fn insert(&mut self, id: PromiseId, record: PromiseRecord) {
        debug_assert!(record.is_pending());
        self.pending += 1;
        let previous = self.records.insert(id, record);
        debug_assert!(previous.is_none(), "promise id reused");
    }

    pub(crate) fn get(&self, id: PromiseId) -> Option<&PromiseRecord> {
        self.records.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PromiseId) -> Option<&mut PromiseRecord> {
        self.records.get_mut(&id)
    }

    /// True when the record left `Pending` or was already destroyed.
    pub(crate) fn is_terminal(&self, id: PromiseId) -> bool {
        self.records.get(&id).map_or(true, |r| !r.is_pending())
    }

    /// Moves a pending record into a terminal state.
    pub(crate) fn settle(&mut self, id: PromiseId, state: PromiseState) {
        debug_assert!(!state.is_pending());
        if let Some(record) = self.records.get_mut(&id) {
            if record.is_pending() {
                self.pending -= 1;
                record.state = state;
            }
        }
    }

    /// Consumes the outcome of a terminal record, destroying the record.
    /// Consuming twice (or consuming a vanished record) reports
    /// `AlreadyConsumed`.
    pub(crate) fn consume(&mut self, id: PromiseId) -> RawOutcome {
        match self.records.remove(&id) {
            Some(record) => match record.state {
                PromiseState::Resolved(value) => Ok(value),
                PromiseState::Failed(error) => Err(error),
                PromiseState::Cancelled => Err(RuntimeError::Cancelled),
                PromiseState::Consumed => Err(RuntimeError::AlreadyConsumed),
                PromiseState::Pending => {
                    unreachable!("pending promise consumed; awaiter bookkeeping is broken")
                }
            },
            None => Err(RuntimeError::AlreadyConsumed),
        }
    }

    /// Destroys a record without delivering its outcome (cancellation
    /// path of the parent/child lifecycle).
    pub(crate) fn destroy(&mut self, id: PromiseId) {
        if let Some(record) = self.records.remove(&id) {
            debug_assert!(!record.is_pending(), "pending promise destroyed");
        }
    }

    #[cfg(test)]
    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}
