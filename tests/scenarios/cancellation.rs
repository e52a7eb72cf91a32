use std::time::{Duration, Instant};

use serial_test::serial;
use tracing_test::traced_test;

use tandem::clock::{self, ClockEvents};
use tandem::{Runtime, RuntimeError, Scope, Step, StepResult};

/// WHY: cancelling a parallel task parked deep in its events hook must
/// interrupt the sleeping domain instead of waiting the sleep out.
/// WHAT: a worker sleeping ten seconds is cancelled after one; the await
/// reports `Cancelled` and the whole run stays far under ten seconds.
#[test]
#[traced_test]
#[serial]
fn cancelling_a_sleeping_parallel_task_interrupts_it() {
    let started = Instant::now();

    let result = Runtime::new()
        .domains(2)
        .seed(41)
        .events(ClockEvents::factory())
        .run(|scope| {
            let sleeper = scope.call(|scope: &mut Scope| {
                let timer = clock::sleep(scope, Duration::from_secs(10));
                Ok(Step::suspend_on(timer, |_, outcome| {
                    Ok(Step::done(outcome.is_ok()))
                }))
            })?;

            let grace = clock::sleep(scope, Duration::from_secs(1));
            Ok(Step::suspend_on(grace, move |scope, _| {
                scope.cancel(&sleeper)?;
                Ok(Step::await_on(sleeper, |_, outcome| {
                    Ok(Step::done(matches!(outcome, Err(RuntimeError::Cancelled))))
                }))
            }))
        });

    assert!(result.expect("root should resolve"), "await should observe Cancelled");

    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_secs(5),
        "cancellation should cut the ten second sleep short, took {elapsed:?}"
    );
}

/// WHY: cancellation must reach every descendant: a cancelled parent with
/// a spinning child can only settle once the child was taken down too,
/// and the runtime can only exit once both settled.
/// WHAT: cancel a parent whose child yields forever; the await reports
/// `Cancelled` and the run terminates.
#[test]
#[traced_test]
#[serial]
fn cancellation_takes_down_the_whole_subtree() {
    fn spin(_: &mut Scope) -> StepResult<usize> {
        Ok(Step::yield_then(spin))
    }

    let result = Runtime::new()
        .domains(1)
        .seed(42)
        .events(ClockEvents::factory())
        .run(|scope| {
            let parent = scope.call_cc(|scope: &mut Scope| {
                let _child = scope.call_cc(spin);
                // parks forever; only cancellation ends this task
                let timer = clock::sleep(scope, Duration::from_secs(600));
                Ok(Step::suspend_on(timer, |_, _| Ok(Step::done(0usize))))
            });

            let grace = clock::sleep(scope, Duration::from_millis(200));
            Ok(Step::suspend_on(grace, move |scope, _| {
                scope.cancel(&parent)?;
                Ok(Step::await_on(parent, |_, outcome| {
                    Ok(Step::done(matches!(outcome, Err(RuntimeError::Cancelled))))
                }))
            }))
        });

    assert!(result.expect("root should resolve"));
}
