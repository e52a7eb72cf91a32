use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serial_test::serial;
use tracing_test::traced_test;

use tandem::{Promise, Runtime, RuntimeError, Scope, Step, StepResult};

fn spin(_: &mut Scope) -> StepResult<usize> {
    Ok(Step::yield_then(spin))
}

/// WHY: a parent returning with still-pending children must not resolve
/// until those children were cancelled and reached terminal states; a
/// surviving child would keep the runtime from ever quiescing.
/// WHAT: a parent abandons a spinning child, still resolves to its own
/// value, and the run terminates.
#[test]
#[traced_test]
#[serial]
fn parent_settles_only_after_its_children() {
    let result = Runtime::new().domains(1).seed(81).run(|scope| {
        let parent = scope.call_cc(|scope: &mut Scope| {
            let _abandoned = scope.call_cc(spin);
            Ok(Step::done(3usize))
        });
        Ok(Step::await_on(parent, |_, outcome| {
            Ok(Step::done(outcome.expect("parent value survives the cleanup")))
        }))
    });
    assert_eq!(result.expect("root should resolve"), 3);
}

/// WHY: `call` must never schedule its body on the calling domain;
/// parallel means parallel.
/// WHAT: every one of eight parallel bodies reports a worker domain.
#[test]
#[traced_test]
#[serial]
fn call_never_runs_on_the_calling_domain() {
    let result = Runtime::new().domains(3).seed(82).run(|scope| {
        let bodies: Vec<_> = (0..8usize)
            .map(|_| |scope: &mut Scope| Ok(Step::done(scope.domain().index())))
            .collect();
        let probes = scope.parallel(bodies)?;
        Ok(Step::await_all(probes, |scope, outcomes| {
            let caller = scope.domain().index();
            let domains: Vec<usize> = outcomes
                .into_iter()
                .map(|outcome| outcome.expect("probe should resolve"))
                .collect();
            Ok(Step::done((caller, domains)))
        }))
    });

    let (caller, domains) = result.expect("root should resolve");
    assert_eq!(caller, 0);
    for domain in domains {
        assert_ne!(domain, caller, "a parallel body ran on its caller's domain");
    }
}

/// WHY: promise identities are issued monotonically and `is_pending`
/// tracks the registry state, not the handle.
/// WHAT: uids grow in creation order; a promise stops being pending once
/// awaited.
#[test]
#[traced_test]
#[serial]
fn uid_and_pending_introspection() {
    let result = Runtime::new().domains(1).seed(83).run(|scope| {
        let first = scope.call_cc(|_| Ok(Step::done(1usize)));
        let second = scope.call_cc(|_| Ok(Step::done(2usize)));
        let ordered = first.uid() < second.uid();
        let pending_before = scope.is_pending(&first) && scope.is_pending(&second);
        Ok(Step::await_all(vec![first, second], move |_, outcomes| {
            for outcome in outcomes {
                outcome.expect("child should resolve");
            }
            Ok(Step::done(ordered && pending_before))
        }))
    });
    assert!(result.expect("root should resolve"));
}

/// WHY: promise operations are bound to the owner domain; a parallel task
/// holding a handle minted elsewhere must be turned away with
/// `ForeignPromise` instead of corrupting a foreign registry.
/// WHAT: awaiting a main-domain promise from a worker fails the worker
/// task with `ForeignPromise`.
#[test]
#[traced_test]
#[serial]
fn foreign_promises_are_rejected() {
    let result = Runtime::new().domains(2).seed(84).run(|scope| {
        let local: Promise<()> = scope.make(|| ());
        let probe = scope.call(move |_: &mut Scope| {
            Ok(Step::await_on(local, |_, _| Ok(Step::done(false))))
        })?;
        Ok(Step::await_on(probe, |_, outcome| {
            Ok(Step::done(matches!(
                outcome,
                Err(RuntimeError::ForeignPromise)
            )))
        }))
    });
    assert!(result.expect("root should resolve"));
}

/// WHY: task panics are contained per task: the worker keeps serving the
/// pool afterwards and the panic surfaces as that task's failure alone.
/// WHAT: a panicking parallel body is followed by a successful one on the
/// same two-domain pool.
#[test]
#[traced_test]
#[serial]
fn a_panicking_parallel_task_does_not_poison_the_pool() {
    let survivors = Arc::new(AtomicUsize::new(0));
    let survivors_probe = survivors.clone();

    let result = Runtime::new().domains(2).seed(85).run(move |scope| {
        let doomed = scope.call(|_: &mut Scope| -> StepResult<usize> {
            panic!("task goes down alone");
        })?;
        Ok(Step::await_on(doomed, move |scope, outcome| {
            let failed = matches!(outcome, Err(RuntimeError::UserFailure(_)));
            let survivors = survivors.clone();
            let follow_up = scope.call(move |_: &mut Scope| {
                survivors.fetch_add(1, Ordering::SeqCst);
                Ok(Step::done(9usize))
            })?;
            Ok(Step::await_on(follow_up, move |_, outcome| {
                Ok(Step::done(failed && outcome.expect("pool should still work") == 9))
            }))
        }))
    });

    assert!(result.expect("root should resolve"));
    assert_eq!(survivors_probe.load(Ordering::SeqCst), 1);
}
