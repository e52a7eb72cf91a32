use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time;

use concurrent_queue::ConcurrentQueue;
use rand_chacha::ChaCha8Rng;

use crate::dispatch::{Dispatcher, JobFlags, ParallelJob};
use crate::errors::{PanicFailure, RuntimeError};
use crate::events::{EventsHook, ReadyTask};
use crate::ids::{DomainId, PromiseId};
use crate::mail::{Directory, DomainLink, Mail};
use crate::park::{IdleStrategy, KillSignal};
use crate::promise::{
    Kind, Promise, PromiseRecord, PromiseState, Registry, ResumeCell, WaitMode, WaitState,
};
use crate::queue::{RunQueue, Runnable};
use crate::step::{
    erase_body, erase_send_body, RawCont, RawOutcome, RawStep, RawStepResult, RawWaitCont,
    StepResult, WaitPayload, WaitRef, WaitTarget,
};
use crate::types::{AnyResult, BoxedError, BoxedValue};

/// Exit condition of a domain's scheduler loop: the main domain runs until
/// the root promise settles, workers until the pool raises the kill
/// signal.
#[derive(Clone, Copy)]
pub(crate) enum LoopUntil {
    RootDone(PromiseId),
    Shutdown,
}

enum CancelAction {
    Noop,
    Remote(Arc<JobFlags>),
    Settle,
    WindDown(Vec<PromiseId>),
}

/// Everything one domain owns: its registry slice, run queue, seeded
/// generator, events hook, and the shared endpoints it talks to the rest
/// of the pool through. Single-threaded by construction; only the inbox,
/// the notifier, and the hook's interrupter are touched from outside.
pub(crate) struct DomainCore {
    id: DomainId,
    total_domains: usize,
    registry: RefCell<Registry>,
    run_queue: RefCell<RunQueue>,
    rng: Rc<RefCell<ChaCha8Rng>>,
    current: Cell<Option<PromiseId>>,
    inbox: Arc<ConcurrentQueue<Mail>>,
    hook: RefCell<Box<dyn EventsHook>>,
    directory: Directory,
    dispatcher: Dispatcher,
    kill: Arc<KillSignal>,
    idle: IdleStrategy,
}

impl DomainCore {
    pub(crate) fn new(
        id: DomainId,
        seed: u64,
        hook: Box<dyn EventsHook>,
        directory: Directory,
        dispatcher: Dispatcher,
        kill: Arc<KillSignal>,
    ) -> Rc<Self> {
        use rand::SeedableRng;

        let total_domains = directory.len();
        let inbox = directory[id.0].inbox();
        Rc::new(Self {
            id,
            total_domains,
            registry: RefCell::new(Registry::new()),
            run_queue: RefCell::new(RunQueue::new()),
            rng: Rc::new(RefCell::new(ChaCha8Rng::seed_from_u64(seed))),
            current: Cell::new(None),
            inbox,
            hook: RefCell::new(hook),
            directory,
            dispatcher,
            kill,
            idle: IdleStrategy::new(time::Duration::from_micros(50), time::Duration::from_millis(2)),
        })
    }

    pub(crate) fn scope(self: &Rc<Self>) -> Scope {
        Scope { core: self.clone() }
    }

    fn link(&self) -> &DomainLink {
        &self.directory[self.id.0]
    }

    /// Registers the root task. Runs once, on the main domain, before the
    /// loop starts.
    pub(crate) fn spawn_root(&self, body: RawCont) -> PromiseId {
        let id = PromiseId::next();
        self.registry
            .borrow_mut()
            .insert(id, PromiseRecord::task(None, body));
        self.run_queue.borrow_mut().push(Runnable::Task(id));
        tracing::debug!("spawned root task {id} on {}", self.id);
        id
    }

    /// Pulls the settled root outcome out of the registry.
    pub(crate) fn take_outcome(&self, id: PromiseId) -> RawOutcome {
        self.registry.borrow_mut().consume(id)
    }

    // --- scheduler loop (C3)

    pub(crate) fn run_loop(self: &Rc<Self>, scope: &mut Scope, until: LoopUntil) {
        let mut idle_rounds: u32 = 0;
        loop {
            self.drain_inbox();

            if let LoopUntil::RootDone(root) = until {
                if self.registry.borrow().is_terminal(root) {
                    break;
                }
            }

            let next = {
                let mut rng = self.rng.borrow_mut();
                self.run_queue.borrow_mut().take_random(&mut rng)
            };
            if let Some(entry) = next {
                self.execute(scope, entry);
                idle_rounds = 0;
                continue;
            }

            if self.registry.borrow().pending_count() > 0 {
                // idle but not quiescent: hand the wait to the events hook
                let entries = self.hook.borrow_mut().select();
                if entries.is_empty() {
                    self.link().notifier.park(self.idle.delay(idle_rounds));
                    idle_rounds = idle_rounds.saturating_add(1);
                } else {
                    tracing::debug!(
                        "events hook returned {} runnable entries on {}",
                        entries.len(),
                        self.id
                    );
                    let mut queue = self.run_queue.borrow_mut();
                    for entry in entries {
                        queue.push(Runnable::Syscall(entry));
                    }
                    idle_rounds = 0;
                }
                continue;
            }

            // quiescent: no runnable entries, no owned pending promises
            match until {
                LoopUntil::RootDone(_) => break,
                LoopUntil::Shutdown => {
                    if self.kill.raised() {
                        break;
                    }
                    if let Some(job) = self.dispatcher.try_adopt() {
                        self.adopt(job);
                        idle_rounds = 0;
                        continue;
                    }
                    let gate = self.dispatcher.gate();
                    gate.try_hold();
                    if self.kill.raised() {
                        break;
                    }
                    if let Some(job) = self.dispatcher.try_adopt() {
                        self.adopt(job);
                        idle_rounds = 0;
                        continue;
                    }
                    gate.wait();
                }
            }
        }
        tracing::debug!("scheduler loop on {} exited", self.id);
    }

    fn drain_inbox(&self) {
        while let Ok(mail) = self.inbox.pop() {
            match mail {
                Mail::Outcome { child, outcome } => {
                    if self.registry.borrow().is_terminal(child) {
                        // late delivery for a locally settled record; the
                        // first transition won, drop it
                        tracing::debug!("dropping stale outcome for {child} on {}", self.id);
                        continue;
                    }
                    self.finalize(child, outcome);
                }
                Mail::CancelTree { root } => {
                    tracing::debug!("cancel request for adopted tree {root} on {}", self.id);
                    self.request_cancel(root);
                }
            }
        }
    }

    /// Claims a parallel job off the global queue and roots it as a local
    /// task. A job flagged cancelled before the claim settled is dropped;
    /// its origin record is already terminal.
    fn adopt(&self, job: ParallelJob) {
        job.flags.claim(self.id);
        if job.flags.is_cancelled() {
            tracing::debug!("dropping cancelled job {} before start", job.child);
            return;
        }
        let body = job.body;
        let cont: RawCont = Box::new(move |scope| body(scope));
        self.registry
            .borrow_mut()
            .insert(job.child, PromiseRecord::adopted(cont, job.origin));
        self.run_queue.borrow_mut().push(Runnable::Task(job.child));
        tracing::debug!("{} adopted parallel task {}", self.id, job.child);
    }

    fn execute(self: &Rc<Self>, scope: &mut Scope, entry: Runnable) {
        match entry {
            Runnable::Task(id) => self.execute_task(scope, id),
            Runnable::Syscall(ready) => self.execute_syscall(ready),
        }
    }

    fn execute_task(self: &Rc<Self>, scope: &mut Scope, id: PromiseId) {
        let (observe_cancel, cell) = {
            let mut registry = self.registry.borrow_mut();
            match registry.get_mut(id) {
                None => return,
                Some(record) if !record.is_pending() => return,
                Some(record) => (
                    record.cancel_requested && record.winding.is_none(),
                    record.resume.take(),
                ),
            }
        };

        if observe_cancel {
            // resumption is a suspension point; cancellation wins here
            self.wind_down(id, Err(RuntimeError::Cancelled));
            return;
        }
        let Some(cell) = cell else {
            return;
        };

        self.current.set(Some(id));
        let result = panic::catch_unwind(AssertUnwindSafe(|| match cell {
            ResumeCell::Start(cont) => cont(scope),
            ResumeCell::Waited(cont, payload) => cont(scope, payload),
        }));
        self.current.set(None);

        let result = result.unwrap_or_else(|payload| Err(panic_to_error(payload)));
        self.apply_step(id, result);
    }

    /// Completes a syscall promise the events hook declared resumable.
    /// Entries for promises that settled in the meantime (cancellation)
    /// are discarded here.
    fn execute_syscall(&self, ready: ReadyTask) {
        let id = ready.id;
        let valid = {
            let registry = self.registry.borrow();
            matches!(
                registry.get(id),
                Some(record) if record.is_pending() && matches!(record.kind, Kind::Syscall)
            )
        };
        if !valid {
            tracing::debug!("discarding ready entry for settled {id}");
            return;
        }

        let produce = {
            let mut registry = self.registry.borrow_mut();
            registry
                .get_mut(id)
                .and_then(|record| record.on_resolve.take())
        };
        let produce = produce.expect("pending syscall promise should hold its resolver");

        let run = ready.run;
        let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
            run();
            produce()
        }));
        match outcome {
            Ok(value) => self.finalize(id, Ok(value)),
            Err(payload) => self.finalize(
                id,
                Err(RuntimeError::UserFailure(panic_to_error(payload))),
            ),
        }
    }

    /// Applies the suspension point a task returned.
    fn apply_step(&self, id: PromiseId, result: RawStepResult) {
        let cancel_requested = {
            self.registry
                .borrow()
                .get(id)
                .map_or(false, |record| record.cancel_requested)
        };

        match result {
            Err(error) => {
                let outcome = if cancel_requested {
                    Err(RuntimeError::Cancelled)
                } else {
                    Err(RuntimeError::UserFailure(error))
                };
                self.wind_down(id, outcome);
            }
            Ok(RawStep::Done(value)) => {
                // once requested, cancellation is never retracted
                let outcome = if cancel_requested {
                    Err(RuntimeError::Cancelled)
                } else {
                    Ok(value)
                };
                self.wind_down(id, outcome);
            }
            Ok(RawStep::Yield(cont)) => {
                if cancel_requested {
                    self.wind_down(id, Err(RuntimeError::Cancelled));
                    return;
                }
                if let Some(record) = self.registry.borrow_mut().get_mut(id) {
                    record.resume = Some(ResumeCell::Start(cont));
                }
                self.run_queue.borrow_mut().push(Runnable::Task(id));
            }
            Ok(RawStep::Wait(target, cont)) => {
                if cancel_requested {
                    self.wind_down(id, Err(RuntimeError::Cancelled));
                    return;
                }
                self.register_wait(id, target, cont);
            }
        }
    }

    // --- await registration

    fn register_wait(&self, task: PromiseId, target: WaitTarget, cont: RawWaitCont) {
        match target {
            WaitTarget::Await(wref) => self.wait_one(task, wref, cont, false),
            WaitTarget::Suspend(wref) => self.wait_one(task, wref, cont, true),
            WaitTarget::All(refs) => self.wait_all(task, refs, cont),
            WaitTarget::First(refs) => self.wait_first(task, refs, cont),
        }
    }

    fn wait_one(&self, task: PromiseId, wref: WaitRef, cont: RawWaitCont, syscall_only: bool) {
        if wref.origin != self.id {
            self.wind_down(task, Err(RuntimeError::ForeignPromise));
            return;
        }

        enum Disposition {
            Missing,
            NotSyscall,
            Busy,
            Terminal,
            Pending,
        }

        let disposition = {
            let registry = self.registry.borrow();
            match registry.get(wref.id) {
                None => Disposition::Missing,
                Some(record) if syscall_only && !matches!(record.kind, Kind::Syscall) => {
                    Disposition::NotSyscall
                }
                Some(record) if !record.is_pending() => Disposition::Terminal,
                Some(record) if record.awaiter.is_some() => Disposition::Busy,
                Some(_) => Disposition::Pending,
            }
        };

        match disposition {
            Disposition::Missing | Disposition::Busy => {
                self.wind_down(task, Err(RuntimeError::AlreadyConsumed));
            }
            Disposition::NotSyscall => {
                self.wind_down(task, Err(RuntimeError::ForeignPromise));
            }
            Disposition::Terminal => {
                let outcome = self.registry.borrow_mut().consume(wref.id);
                self.resume_with(task, cont, WaitPayload::One(outcome));
            }
            Disposition::Pending => {
                let mut registry = self.registry.borrow_mut();
                registry
                    .get_mut(wref.id)
                    .expect("awaited promise should be present")
                    .awaiter = Some(task);
                registry
                    .get_mut(task)
                    .expect("waiting task should be present")
                    .wait = Some(WaitState {
                    mode: WaitMode::One { target: wref.id },
                    cont,
                });
            }
        }
    }

    fn validate_list(&self, refs: &[WaitRef], unique: bool) -> Option<RuntimeError> {
        if refs.is_empty() {
            return Some(RuntimeError::EmptyAwait);
        }
        let mut seen = HashSet::new();
        let registry = self.registry.borrow();
        for wref in refs {
            if wref.origin != self.id {
                return Some(RuntimeError::ForeignPromise);
            }
            if unique && !seen.insert(wref.id) {
                return Some(RuntimeError::AlreadyConsumed);
            }
            match registry.get(wref.id) {
                None => return Some(RuntimeError::AlreadyConsumed),
                Some(record) if record.is_pending() && record.awaiter.is_some() => {
                    return Some(RuntimeError::AlreadyConsumed)
                }
                Some(_) => {}
            }
        }
        None
    }

    fn wait_all(&self, task: PromiseId, refs: Vec<WaitRef>, cont: RawWaitCont) {
        if let Some(error) = self.validate_list(&refs, true) {
            self.wind_down(task, Err(error));
            return;
        }

        let targets: Vec<PromiseId> = refs.iter().map(|r| r.id).collect();
        let mut slots: Vec<Option<RawOutcome>> = Vec::with_capacity(refs.len());
        slots.resize_with(refs.len(), || None);
        let mut remaining = 0usize;

        for (index, wref) in refs.iter().enumerate() {
            let terminal = {
                let registry = self.registry.borrow();
                registry
                    .get(wref.id)
                    .map_or(true, |record| !record.is_pending())
            };
            if terminal {
                slots[index] = Some(self.registry.borrow_mut().consume(wref.id));
            } else {
                remaining += 1;
                self.registry
                    .borrow_mut()
                    .get_mut(wref.id)
                    .expect("validated promise should be present")
                    .awaiter = Some(task);
            }
        }

        if remaining == 0 {
            let outcomes = slots
                .into_iter()
                .map(|slot| slot.expect("every slot should be filled"))
                .collect();
            self.resume_with(task, cont, WaitPayload::Many(outcomes));
        } else if let Some(record) = self.registry.borrow_mut().get_mut(task) {
            record.wait = Some(WaitState {
                mode: WaitMode::All {
                    targets,
                    slots,
                    remaining,
                },
                cont,
            });
        }
    }

    fn wait_first(&self, task: PromiseId, refs: Vec<WaitRef>, cont: RawWaitCont) {
        if let Some(error) = self.validate_list(&refs, false) {
            self.wind_down(task, Err(error));
            return;
        }

        let winner = refs.iter().map(|r| r.id).find(|id| {
            self.registry
                .borrow()
                .get(*id)
                .map_or(false, |record| !record.is_pending())
        });

        if let Some(winner) = winner {
            let outcome = self.registry.borrow_mut().consume(winner);
            for wref in &refs {
                if wref.id != winner {
                    self.request_cancel(wref.id);
                }
            }
            self.resume_with(task, cont, WaitPayload::One(outcome));
            return;
        }

        let targets: Vec<PromiseId> = refs.iter().map(|r| r.id).collect();
        {
            let mut registry = self.registry.borrow_mut();
            for target in &targets {
                registry
                    .get_mut(*target)
                    .expect("validated promise should be present")
                    .awaiter = Some(task);
            }
            if let Some(record) = registry.get_mut(task) {
                record.wait = Some(WaitState {
                    mode: WaitMode::First { targets: targets.clone() },
                    cont,
                });
            }
        }
    }

    fn resume_with(&self, task: PromiseId, cont: RawWaitCont, payload: WaitPayload) {
        if let Some(record) = self.registry.borrow_mut().get_mut(task) {
            record.resume = Some(ResumeCell::Waited(cont, payload));
        }
        self.run_queue.borrow_mut().push(Runnable::Task(task));
    }

    // --- completion and the parent/child lifecycle

    /// Finishes a task whose step returned (or which was cancelled). The
    /// promise leaves `Pending` only after every pending child has been
    /// cancelled and reached a terminal state itself.
    fn wind_down(&self, id: PromiseId, outcome: RawOutcome) {
        let pending_children: Vec<PromiseId> = {
            let registry = self.registry.borrow();
            let Some(record) = registry.get(id) else {
                return;
            };
            record
                .children
                .iter()
                .copied()
                .filter(|child| !registry.is_terminal(*child))
                .collect()
        };

        if pending_children.is_empty() {
            self.finalize(id, outcome);
            return;
        }

        tracing::debug!(
            "{id} finishing with {} pending children; cancelling them first",
            pending_children.len()
        );
        if let Some(record) = self.registry.borrow_mut().get_mut(id) {
            record.winding = Some(outcome);
        }
        for child in pending_children {
            self.request_cancel(child);
        }
    }

    /// The single place a promise leaves `Pending`: stores the terminal
    /// state, wakes the awaiter, reports adopted roots back to their
    /// origin, and completes a winding parent once its last child is done.
    fn finalize(&self, id: PromiseId, outcome: RawOutcome) {
        let (parent, awaiter, report_to, children, stale_wait) = {
            let mut registry = self.registry.borrow_mut();
            let Some(record) = registry.get_mut(id) else {
                return;
            };
            if !record.is_pending() {
                return;
            }
            let parent = record.parent;
            let awaiter = record.awaiter.take();
            let report_to = record.report_to;
            let children = record.children.clone();
            record.resume = None;
            let stale_wait = record.wait.take();
            let state = match outcome {
                Ok(value) => PromiseState::Resolved(value),
                Err(RuntimeError::Cancelled) => PromiseState::Cancelled,
                Err(error) => PromiseState::Failed(error),
            };
            registry.settle(id, state);
            (parent, awaiter, report_to, children, stale_wait)
        };
        tracing::debug!("{id} settled on {}", self.id);

        // a task settled while waiting (cancellation): unhook it from its
        // targets so their completion does not try to wake it
        if let Some(wait) = stale_wait {
            let mut registry = self.registry.borrow_mut();
            for target in wait.mode.targets() {
                if let Some(record) = registry.get_mut(*target) {
                    if record.awaiter == Some(id) {
                        record.awaiter = None;
                    }
                }
            }
        }

        // reap settled, unobserved children now that the parent settled;
        // resolved-but-never-awaited handles would otherwise pile up in
        // the registry for the life of the domain
        {
            let mut registry = self.registry.borrow_mut();
            for child in &children {
                let reapable = matches!(
                    registry.get(*child),
                    Some(record)
                        if !matches!(
                            record.state,
                            PromiseState::Pending | PromiseState::Consumed
                        ) && record.awaiter.is_none()
                );
                if reapable {
                    registry.destroy(*child);
                }
            }
        }

        if let Some(origin) = report_to {
            let outcome = self.registry.borrow_mut().consume(id);
            self.directory[origin.0].post(Mail::Outcome { child: id, outcome });
            return;
        }

        if let Some(waiter) = awaiter {
            self.progress_wait(waiter, id);
        }

        if let Some(parent) = parent {
            let ready = {
                let registry = self.registry.borrow();
                registry.get(parent).is_some_and(|record| {
                    record.winding.is_some()
                        && record
                            .children
                            .iter()
                            .all(|child| registry.is_terminal(*child))
                })
            };
            if ready {
                let outcome = {
                    let mut registry = self.registry.borrow_mut();
                    registry
                        .get_mut(parent)
                        .and_then(|record| record.winding.take())
                };
                if let Some(outcome) = outcome {
                    self.finalize(parent, outcome);
                }
            }
        }
    }

    /// Advances the wait of `waiter` after `completed` settled.
    fn progress_wait(&self, waiter: PromiseId, completed: PromiseId) {
        let wait = {
            let mut registry = self.registry.borrow_mut();
            registry
                .get_mut(waiter)
                .and_then(|record| record.wait.take())
        };
        let Some(WaitState { mode, cont }) = wait else {
            return;
        };

        match mode {
            WaitMode::One { target } => {
                debug_assert_eq!(target, completed);
                let outcome = self.registry.borrow_mut().consume(completed);
                self.resume_with(waiter, cont, WaitPayload::One(outcome));
            }
            WaitMode::All {
                targets,
                mut slots,
                mut remaining,
            } => {
                let index = targets
                    .iter()
                    .position(|t| *t == completed)
                    .expect("completed promise should be a wait target");
                let outcome = self.registry.borrow_mut().consume(completed);
                slots[index] = Some(outcome);
                remaining -= 1;

                if remaining == 0 {
                    let outcomes = slots
                        .into_iter()
                        .map(|slot| slot.expect("every slot should be filled"))
                        .collect();
                    self.resume_with(waiter, cont, WaitPayload::Many(outcomes));
                } else if let Some(record) = self.registry.borrow_mut().get_mut(waiter) {
                    record.wait = Some(WaitState {
                        mode: WaitMode::All {
                            targets,
                            slots,
                            remaining,
                        },
                        cont,
                    });
                }
            }
            WaitMode::First { targets } => {
                let outcome = self.registry.borrow_mut().consume(completed);
                for target in targets {
                    if target == completed {
                        continue;
                    }
                    if let Some(record) = self.registry.borrow_mut().get_mut(target) {
                        if record.awaiter == Some(waiter) {
                            record.awaiter = None;
                        }
                    }
                    self.request_cancel(target);
                }
                self.resume_with(waiter, cont, WaitPayload::One(outcome));
            }
        }
    }

    // --- cancellation engine (C5)

    /// Requests cancellation of a promise and, transitively, of its
    /// descendants. Strictly top-down: cancelling a child never touches
    /// its parent.
    pub(crate) fn request_cancel(&self, id: PromiseId) {
        let action = {
            let mut registry = self.registry.borrow_mut();
            let Some(record) = registry.get_mut(id) else {
                return;
            };
            if !record.is_pending() {
                return;
            }
            if self.current.get() == Some(id) {
                // self-cancellation: observed at the next suspension point
                record.cancel_requested = true;
                CancelAction::Noop
            } else if record.winding.is_some() {
                // already finishing; the terminal state becomes Cancelled
                if !record.cancel_requested {
                    record.cancel_requested = true;
                    record.winding = Some(Err(RuntimeError::Cancelled));
                }
                CancelAction::Noop
            } else if record.cancel_requested {
                CancelAction::Noop
            } else {
                record.cancel_requested = true;
                match &record.kind {
                    Kind::Remote { flags } => CancelAction::Remote(flags.clone()),
                    Kind::Syscall => CancelAction::Settle,
                    Kind::Task => {
                        record.resume = None;
                        let targets = record
                            .wait
                            .take()
                            .map(|wait| wait.mode.targets().to_vec())
                            .unwrap_or_default();
                        CancelAction::WindDown(targets)
                    }
                }
            }
        };

        match action {
            CancelAction::Noop => {}
            CancelAction::Remote(flags) => {
                // stop the job before it starts, settle the await side,
                // then chase whichever domain already adopted it
                flags.cancel();
                self.finalize(id, Err(RuntimeError::Cancelled));
                if let Some(adopter) = flags.adopter() {
                    self.directory[adopter.0].post(Mail::CancelTree { root: id });
                }
            }
            CancelAction::Settle => {
                // withdraw the hook's registration; the maturity-time
                // discard stays as the backstop for hooks that keep no
                // per-promise state
                self.hook.borrow_mut().cancel(id);
                self.finalize(id, Err(RuntimeError::Cancelled));
            }
            CancelAction::WindDown(targets) => {
                let mut registry = self.registry.borrow_mut();
                for target in targets {
                    if let Some(record) = registry.get_mut(target) {
                        if record.awaiter == Some(id) {
                            record.awaiter = None;
                        }
                    }
                }
                drop(registry);
                self.wind_down(id, Err(RuntimeError::Cancelled));
            }
        }
    }
}

fn panic_to_error(payload: Box<dyn Any + Send>) -> BoxedError {
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string());
    Box::new(PanicFailure(message))
}

/// The per-domain surface handed to task bodies and continuations. All
/// promise creation, cancellation, and introspection goes through here;
/// everything is domain-local and runs between suspension points.
pub struct Scope {
    core: Rc<DomainCore>,
}

impl Scope {
    /// The executing domain.
    #[must_use]
    pub fn domain(&self) -> DomainId {
        self.core.id
    }

    /// The domain's seeded random generator, shared with the scheduler's
    /// own selection draws.
    #[must_use]
    pub fn rng(&self) -> Rc<RefCell<ChaCha8Rng>> {
        self.core.rng.clone()
    }

    /// Submits `body` as a parallel task: it is queued on the process-wide
    /// dispatcher and runs on some domain other than this one. Fails with
    /// `EmptyDomainPool` when the pool has no other domain.
    pub fn call<T, F>(&mut self, body: F) -> AnyResult<Promise<T>, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> StepResult<T> + Send + 'static,
    {
        if self.core.total_domains < 2 {
            return Err(RuntimeError::EmptyDomainPool);
        }

        let id = PromiseId::next();
        let parent = self.core.current.get();
        let flags = Arc::new(JobFlags::new());
        {
            let mut registry = self.core.registry.borrow_mut();
            registry.insert(id, PromiseRecord::remote(parent, flags.clone()));
            if let Some(parent) = parent {
                if let Some(record) = registry.get_mut(parent) {
                    record.children.push(id);
                }
            }
        }

        let erased = erase_send_body(body);
        let job = ParallelJob {
            child: id,
            origin: self.core.id,
            flags,
            body: erased,
        };
        {
            let mut rng = self.core.rng.borrow_mut();
            self.core
                .dispatcher
                .submit(job, self.core.id, &self.core.directory, &mut rng)
                .expect("dispatcher queue should stay open while tasks run");
        }
        tracing::debug!("submitted parallel task {id} from {}", self.core.id);
        Ok(Promise::new(id, self.core.id))
    }

    /// Spawns `body` as a concurrent task on the current domain's run
    /// queue; it interleaves with the caller at suspension points.
    pub fn call_cc<T, F>(&mut self, body: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> StepResult<T> + 'static,
    {
        let id = PromiseId::next();
        let parent = self.core.current.get();
        {
            let mut registry = self.core.registry.borrow_mut();
            registry.insert(id, PromiseRecord::task(parent, erase_body(body)));
            if let Some(parent) = parent {
                if let Some(record) = registry.get_mut(parent) {
                    record.children.push(id);
                }
            }
        }
        self.core.run_queue.borrow_mut().push(Runnable::Task(id));
        tracing::debug!("spawned concurrent task {id} on {}", self.core.id);
        Promise::new(id, self.core.id)
    }

    /// Creates a syscall promise: one resolved by external code through
    /// the events hook. `on_resolve` produces the value when the hook
    /// hands the promise back as resumable.
    pub fn make<T, F>(&mut self, on_resolve: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + 'static,
    {
        let id = PromiseId::next();
        let parent = self.core.current.get();
        let produce: Box<dyn FnOnce() -> BoxedValue> =
            Box::new(move || Box::new(on_resolve()) as BoxedValue);
        {
            let mut registry = self.core.registry.borrow_mut();
            registry.insert(id, PromiseRecord::syscall(parent, produce));
            if let Some(parent) = parent {
                if let Some(record) = registry.get_mut(parent) {
                    record.children.push(id);
                }
            }
        }
        tracing::debug!("created syscall promise {id} on {}", self.core.id);
        Promise::new(id, self.core.id)
    }

    /// Packages a syscall promise with the closure an events hook runs
    /// when it returns the promise as resumable.
    pub fn ready_task<T, F>(&mut self, promise: &Promise<T>, run: F) -> ReadyTask
    where
        F: FnOnce() + 'static,
    {
        ReadyTask::new(promise.uid(), Box::new(run))
    }

    /// Requests cancellation of `promise` and all of its descendants.
    /// Legal only from the promise's origin domain.
    pub fn cancel<T>(&mut self, promise: &Promise<T>) -> AnyResult<(), RuntimeError> {
        if promise.origin() != self.core.id {
            return Err(RuntimeError::ForeignPromise);
        }
        self.core.request_cancel(promise.uid());
        Ok(())
    }

    /// True while the promise has not settled.
    #[must_use]
    pub fn is_pending<T>(&self, promise: &Promise<T>) -> bool {
        promise.origin() == self.core.id
            && self
                .core
                .registry
                .borrow()
                .get(promise.uid())
                .is_some_and(PromiseRecord::is_pending)
    }

    /// Submits every body as a parallel task, in input order. A shorthand
    /// for mapping [`Scope::call`] over a workload before `await_all`.
    pub fn parallel<T, F>(&mut self, bodies: Vec<F>) -> AnyResult<Vec<Promise<T>>, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> StepResult<T> + Send + 'static,
    {
        bodies.into_iter().map(|body| self.call(body)).collect()
    }
}
