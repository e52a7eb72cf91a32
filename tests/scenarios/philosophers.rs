use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serial_test::serial;
use tracing_test::traced_test;

use tandem::clock::{self, ClockEvents};
use tandem::{Promise, Runtime, RuntimeError, Scope, Step, StepResult};

const SEATS: usize = 5;
const TIMED_OUT: usize = usize::MAX;

/// Grab both forks in one non-preemptible step or back off and retry at
/// the next suspension point; no hold-and-wait, so somebody always eats.
fn philosopher(
    seat: usize,
    left: Arc<Mutex<()>>,
    right: Arc<Mutex<()>>,
    meals: Arc<AtomicUsize>,
) -> StepResult<usize> {
    let got_both = {
        let first = left.try_lock();
        let second = right.try_lock();
        first.is_ok() && second.is_ok()
    };
    if got_both {
        meals.fetch_add(1, Ordering::SeqCst);
        Ok(Step::done(seat))
    } else {
        Ok(Step::yield_then(move |_: &mut Scope| {
            philosopher(seat, left, right, meals)
        }))
    }
}

/// WHY: shared-state tasks (mutex forks) across the pool must compose
/// with `await_first` timeouts: the first finished diner wins and every
/// other diner is cancelled, including the ones still queued on the
/// dispatcher.
/// WHAT: with five `call` diners on two workers, at least one eats well
/// before the timeout and the run terminates.
#[test]
#[traced_test]
#[serial]
fn at_least_one_philosopher_eats_before_the_timeout() {
    let meals = Arc::new(AtomicUsize::new(0));
    let meals_probe = meals.clone();

    let winner = Runtime::new()
        .domains(3)
        .seed(61)
        .events(ClockEvents::factory())
        .run(move |scope| {
            let forks: Vec<Arc<Mutex<()>>> =
                (0..SEATS).map(|_| Arc::new(Mutex::new(()))).collect();

            let mut contenders: Vec<Promise<usize>> = Vec::with_capacity(SEATS + 1);
            for seat in 0..SEATS {
                let left = forks[seat].clone();
                let right = forks[(seat + 1) % SEATS].clone();
                let meals = meals.clone();
                contenders.push(scope.call(move |_: &mut Scope| {
                    philosopher(seat, left, right, meals)
                })?);
            }

            contenders.push(scope.call_cc(|scope: &mut Scope| {
                let timer = clock::sleep(scope, Duration::from_secs(5));
                Ok(Step::suspend_on(timer, |_, _| Ok(Step::done(TIMED_OUT))))
            }));

            Ok(Step::await_first(contenders, |_, outcome| {
                match outcome {
                    Ok(seat) => Ok(Step::done(seat)),
                    Err(RuntimeError::Cancelled) => Ok(Step::done(TIMED_OUT)),
                    Err(other) => Err(other.into()),
                }
            }))
        })
        .expect("root should resolve");

    assert_ne!(winner, TIMED_OUT, "a diner should finish before the timeout");
    assert!(winner < SEATS);
    assert!(
        meals_probe.load(Ordering::SeqCst) >= 1,
        "at least one philosopher should have eaten"
    );
}
