use std::marker::PhantomData;

use crate::domain::Scope;
use crate::errors::RuntimeError;
use crate::ids::PromiseId;
use crate::promise::Promise;
use crate::types::{AnyResult, BoxedError, BoxedValue};

/// Outcome of an awaited promise as seen by a continuation.
pub type Outcome<T> = AnyResult<T, RuntimeError>;

/// What a task body or continuation returns: the next suspension point,
/// or an error that fails the task's promise (`UserFailure`).
pub type StepResult<T> = AnyResult<Step<T>, BoxedError>;

pub(crate) type RawOutcome = AnyResult<BoxedValue, RuntimeError>;

pub(crate) type RawStepResult = AnyResult<RawStep, BoxedError>;

/// A suspended continuation: everything the scheduler needs to resume a
/// task. The closure carries no references into the scheduler; it receives
/// the domain scope fresh on resumption.
pub(crate) type RawCont = Box<dyn FnOnce(&mut Scope) -> RawStepResult + 'static>;

pub(crate) type RawWaitCont = Box<dyn FnOnce(&mut Scope, WaitPayload) -> RawStepResult + 'static>;

/// Identity of an awaited promise plus the domain its handle was minted
/// on, so misuse across domains can be told apart from double consumption.
#[derive(Clone, Copy)]
pub(crate) struct WaitRef {
    pub(crate) id: PromiseId,
    pub(crate) origin: crate::ids::DomainId,
}

impl WaitRef {
    fn of<T>(promise: &Promise<T>) -> Self {
        Self {
            id: promise.uid(),
            origin: promise.origin(),
        }
    }
}

/// The promises a parked task is waiting on.
pub(crate) enum WaitTarget {
    /// `await` on a single promise, consuming its outcome.
    Await(WaitRef),
    /// `suspend` on a syscall promise of the current domain.
    Suspend(WaitRef),
    /// `await_all`: park until every listed promise is terminal.
    All(Vec<WaitRef>),
    /// `await_first`: park until one is terminal, cancel the rest.
    First(Vec<WaitRef>),
}

/// Outcomes delivered back into a waiting continuation.
pub(crate) enum WaitPayload {
    One(RawOutcome),
    Many(Vec<RawOutcome>),
}

impl WaitPayload {
    pub(crate) fn into_one(self) -> RawOutcome {
        match self {
            WaitPayload::One(outcome) => outcome,
            WaitPayload::Many(_) => unreachable!("single wait delivered a list payload"),
        }
    }

    pub(crate) fn into_many(self) -> Vec<RawOutcome> {
        match self {
            WaitPayload::Many(outcomes) => outcomes,
            WaitPayload::One(_) => unreachable!("list wait delivered a single payload"),
        }
    }
}

/// Type-erased suspension point, the scheduler's working currency.
pub(crate) enum RawStep {
    Done(BoxedValue),
    Yield(RawCont),
    Wait(WaitTarget, RawWaitCont),
}

/// A cooperative suspension point of a task.
///
/// A task body is a closure `FnOnce(&mut Scope) -> StepResult<T>`; every
/// value it returns is one of the suspension points below, and the
/// scheduler only ever switches tasks at these returns. The continuation
/// handed to each constructor runs when the task is next resumed.
pub struct Step<T> {
    pub(crate) raw: RawStep,
    _marker: PhantomData<fn() -> T>,
}

fn typed_outcome<U: Send + 'static>(raw: RawOutcome) -> Outcome<U> {
    raw.map(|value| {
        *value
            .downcast::<U>()
            .expect("promise outcome should match the handle type")
    })
}

impl<T: Send + 'static> Step<T> {
    fn from_raw(raw: RawStep) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Finish the task with `value`. If the task still has pending
    /// children they are cancelled and awaited before the promise leaves
    /// `Pending`.
    pub fn done(value: T) -> Self {
        Self::from_raw(RawStep::Done(Box::new(value)))
    }

    /// Voluntary suspension point: put the task back on the run queue and
    /// let its siblings make progress before `next` runs.
    pub fn yield_then<F>(next: F) -> Self
    where
        F: FnOnce(&mut Scope) -> StepResult<T> + 'static,
    {
        Self::from_raw(RawStep::Yield(Box::new(move |scope| {
            next(scope).map(|step| step.raw)
        })))
    }

    /// Park until `promise` leaves `Pending`, then run `next` with the
    /// consumed outcome. The promise must belong to the current domain.
    pub fn await_on<U, F>(promise: Promise<U>, next: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(&mut Scope, Outcome<U>) -> StepResult<T> + 'static,
    {
        Self::from_raw(RawStep::Wait(
            WaitTarget::Await(WaitRef::of(&promise)),
            Box::new(move |scope, payload| {
                next(scope, typed_outcome(payload.into_one())).map(|step| step.raw)
            }),
        ))
    }

    /// Park on a syscall promise until external code resolves it through
    /// the events hook. Fails the task with `ForeignPromise` if the
    /// promise is not a syscall promise of the current domain.
    pub fn suspend_on<U, F>(promise: Promise<U>, next: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(&mut Scope, Outcome<U>) -> StepResult<T> + 'static,
    {
        Self::from_raw(RawStep::Wait(
            WaitTarget::Suspend(WaitRef::of(&promise)),
            Box::new(move |scope, payload| {
                next(scope, typed_outcome(payload.into_one())).map(|step| step.raw)
            }),
        ))
    }

    /// Park until every promise in `promises` is terminal; outcomes are
    /// delivered in input order. The list must be non-empty or the task
    /// fails with `EmptyAwait`.
    pub fn await_all<U, F>(promises: Vec<Promise<U>>, next: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(&mut Scope, Vec<Outcome<U>>) -> StepResult<T> + 'static,
    {
        let refs = promises.iter().map(WaitRef::of).collect();
        Self::from_raw(RawStep::Wait(
            WaitTarget::All(refs),
            Box::new(move |scope, payload| {
                let outcomes = payload.into_many().into_iter().map(typed_outcome).collect();
                next(scope, outcomes).map(|step| step.raw)
            }),
        ))
    }

    /// Park until the first of `promises` is terminal; every other listed
    /// promise is cancelled before `next` runs. The list must be
    /// non-empty or the task fails with `EmptyAwait`.
    pub fn await_first<U, F>(promises: Vec<Promise<U>>, next: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(&mut Scope, Outcome<U>) -> StepResult<T> + 'static,
    {
        let refs = promises.iter().map(WaitRef::of).collect();
        Self::from_raw(RawStep::Wait(
            WaitTarget::First(refs),
            Box::new(move |scope, payload| {
                next(scope, typed_outcome(payload.into_one())).map(|step| step.raw)
            }),
        ))
    }
}

pub(crate) fn erase_body<T, F>(body: F) -> RawCont
where
    T: Send + 'static,
    F: FnOnce(&mut Scope) -> StepResult<T> + 'static,
{
    Box::new(move |scope| body(scope).map(|step| step.raw))
}

pub(crate) fn erase_send_body<T, F>(
    body: F,
) -> Box<dyn FnOnce(&mut Scope) -> RawStepResult + Send + 'static>
where
    T: Send + 'static,
    F: FnOnce(&mut Scope) -> StepResult<T> + Send + 'static,
{
    Box::new(move |scope| body(scope).map(|step| step.raw))
}
