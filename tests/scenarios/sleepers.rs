use std::time::{Duration, Instant};

use serial_test::serial;
use tracing_test::traced_test;

use tandem::clock::{self, ClockEvents};
use tandem::{Runtime, Scope, Step};

/// WHY: sleeping tasks on one domain must share the wait instead of
/// serializing it; the scheduler parks in the clock hook's `select` until
/// the nearest deadline.
/// WHAT: two concurrent one-second sleepers finish in well under the
/// two-sleep sum.
#[test]
#[traced_test]
#[serial]
fn two_concurrent_sleepers_share_the_wait() {
    let started = Instant::now();

    let nap = |scope: &mut Scope| -> Step<()> {
        let timer = clock::sleep(scope, Duration::from_secs(1));
        Step::suspend_on(timer, |_, outcome| {
            outcome.expect("timer should resolve");
            Ok(Step::done(()))
        })
    };

    Runtime::new()
        .domains(1)
        .seed(21)
        .events(ClockEvents::factory())
        .run(move |scope| {
            let first = scope.call_cc(move |scope| Ok(nap(scope)));
            let second = scope.call_cc(move |scope| Ok(nap(scope)));
            Ok(Step::await_all(vec![first, second], |_, outcomes| {
                for outcome in outcomes {
                    outcome.expect("sleeper should resolve");
                }
                Ok(Step::done(()))
            }))
        })
        .expect("root should resolve");

    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_secs(3),
        "sleepers should overlap, took {elapsed:?}"
    );
    assert!(
        elapsed >= Duration::from_millis(900),
        "a full sleep must still elapse, took {elapsed:?}"
    );
}

/// WHY: a domain with an empty run queue but pending syscall promises
/// must keep consulting its events hook rather than spin or stall.
/// WHAT: a single sleeper resolves close to its deadline.
#[test]
#[traced_test]
#[serial]
fn single_sleeper_resolves_near_its_deadline() {
    let started = Instant::now();

    Runtime::new()
        .domains(1)
        .seed(22)
        .events(ClockEvents::factory())
        .run(|scope| {
            let timer = clock::sleep(scope, Duration::from_millis(300));
            Ok(Step::suspend_on(timer, |_, outcome| {
                outcome.expect("timer should resolve");
                Ok(Step::done(()))
            }))
        })
        .expect("root should resolve");

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(280), "woke early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "woke far too late: {elapsed:?}");
}
