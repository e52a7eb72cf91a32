use std::time::{Duration, Instant};

use serial_test::serial;
use tracing_test::traced_test;

use tandem::{Runtime, Scope, Step};

/// WHY: `await_all` must deliver outcomes in input order even though the
/// dispatcher hands the bodies to whichever worker frees up first, and
/// the submissions must actually overlap across the pool.
/// WHAT: six compute-bound bodies on three workers finish in the order
/// they were submitted and in much less than serial time.
#[test]
#[traced_test]
#[serial]
fn parallel_map_keeps_input_order_and_overlaps() {
    let started = Instant::now();

    let result = Runtime::new().domains(4).seed(31).run(|scope| {
        let bodies: Vec<_> = (0..6usize)
            .map(|index| {
                move |_: &mut Scope| {
                    // stand-in for a CPU-bound stretch between suspension
                    // points; the worker domain is non-preemptible here
                    std::thread::sleep(Duration::from_millis(150));
                    Ok(Step::done(index * index))
                }
            })
            .collect();

        let promises = scope.parallel(bodies)?;
        Ok(Step::await_all(promises, |_, outcomes| {
            let squares: Vec<usize> = outcomes
                .into_iter()
                .map(|outcome| outcome.expect("worker should resolve"))
                .collect();
            Ok(Step::done(squares))
        }))
    });

    assert_eq!(result.expect("root should resolve"), vec![0, 1, 4, 9, 16, 25]);

    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(750),
        "six 150ms bodies on three workers should overlap, took {elapsed:?}"
    );
}
