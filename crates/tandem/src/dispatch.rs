use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use concurrent_queue::{ConcurrentQueue, PushError};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::domain::Scope;
use crate::errors::DispatchError;
use crate::ids::{DomainId, PromiseId};
use crate::mail::Directory;
use crate::park::Gate;
use crate::step::RawStepResult;
use crate::types::AnyResult;

const UNADOPTED: usize = usize::MAX;

/// State shared between a parallel submission's origin record and the
/// domain that eventually runs it. Arbitrates the cancel/adopt race: the
/// adopter re-checks the cancel flag after claiming, the canceller reads
/// the adopter after flagging, so a cancelled job is either dropped
/// unexecuted or unwound by mail, never lost.
pub struct JobFlags {
    cancelled: AtomicBool,
    adopter: AtomicUsize,
}

impl JobFlags {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            adopter: AtomicUsize::new(UNADOPTED),
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn claim(&self, domain: DomainId) {
        self.adopter.store(domain.0, Ordering::SeqCst);
    }

    pub(crate) fn adopter(&self) -> Option<DomainId> {
        match self.adopter.load(Ordering::SeqCst) {
            UNADOPTED => None,
            index => Some(DomainId(index)),
        }
    }
}

/// A `call` submission travelling through the global queue.
pub(crate) struct ParallelJob {
    /// Uid shared by the origin-side record and the adopted root record.
    pub(crate) child: PromiseId,
    /// Domain holding the await-side record; outcomes post back here.
    pub(crate) origin: DomainId,
    pub(crate) flags: Arc<JobFlags>,
    pub(crate) body: Box<dyn FnOnce(&mut Scope) -> RawStepResult + Send + 'static>,
}

/// The process-wide submission queue for parallel tasks, plus the latch
/// quiescent domains sleep on. Multi-producer multi-consumer: any
/// quiescent domain may adopt any queued job; first to dequeue wins.
pub(crate) struct Dispatcher {
    jobs: Arc<ConcurrentQueue<ParallelJob>>,
    gate: Arc<Gate>,
}

impl Clone for Dispatcher {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            jobs: Arc::new(ConcurrentQueue::unbounded()),
            gate: Arc::new(Gate::new()),
        }
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Queues a job, nudges one random domain other than the caller's
    /// (the preferred adopter), and releases every quiescent sleeper so
    /// the first free domain can win the job instead.
    pub(crate) fn submit(
        &self,
        job: ParallelJob,
        caller: DomainId,
        directory: &Directory,
        rng: &mut ChaCha8Rng,
    ) -> AnyResult<(), DispatchError> {
        match self.jobs.push(job) {
            Ok(()) => {}
            Err(PushError::Full(_)) => return Err(DispatchError::QueueFull),
            Err(PushError::Closed(_)) => return Err(DispatchError::QueueClosed),
        }

        let others: Vec<&crate::mail::DomainLink> =
            directory.iter().filter(|link| link.id != caller).collect();
        if !others.is_empty() {
            let pick = rng.random_range(0..others.len());
            others[pick].wake();
        }
        self.gate.open_all();
        Ok(())
    }

    pub(crate) fn try_adopt(&self) -> Option<ParallelJob> {
        let job = self.jobs.pop().ok();
        // one gate release can be consumed by a single sleeper; hand the
        // wakeup on while submissions remain queued
        if job.is_some() && !self.jobs.is_empty() {
            self.gate.open_all();
        }
        job
    }
}
