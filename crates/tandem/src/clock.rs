//! Timer driver for the events hook: `sleep` parks a task on a syscall
//! promise that matures after a deadline. This is the reference consumer
//! of the events interface; richer I/O drivers follow the same shape.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::Scope;
use crate::events::{EventsFactory, EventsHook, Interrupt, Notifier, ReadyTask};
use crate::ids::{DomainId, PromiseId};
use crate::promise::Promise;

/// Longest one `select` blocks when no sleeper is registered, so inbox
/// traffic and teardown are never starved by an idle clock.
const EMPTY_TABLE_PARK: Duration = Duration::from_millis(50);

struct Sleeper {
    at: Instant,
    entry: ReadyTask,
}

struct ClockTable {
    sleepers: Vec<Sleeper>,
}

impl ClockTable {
    fn new() -> Self {
        Self {
            sleepers: Vec::new(),
        }
    }

    /// Time until the earliest deadline, clamped to zero for deadlines
    /// that passed while the domain was busy.
    fn nearest(&self, now: Instant) -> Option<Duration> {
        self.sleepers
            .iter()
            .map(|sleeper| sleeper.at.saturating_duration_since(now))
            .min()
    }

    fn take_matured(&mut self, now: Instant) -> Vec<ReadyTask> {
        let mut matured = Vec::new();
        let mut index = 0;
        while index < self.sleepers.len() {
            if self.sleepers[index].at <= now {
                matured.push(self.sleepers.swap_remove(index).entry);
            } else {
                index += 1;
            }
        }
        matured
    }

    /// Drops the sleeper registered for a cancelled promise so its entry
    /// does not sit in the table until the deadline would have matured.
    fn remove(&mut self, id: PromiseId) {
        self.sleepers.retain(|sleeper| sleeper.entry.promise_uid() != id);
    }
}

thread_local! {
    static DOMAIN_CLOCK: RefCell<Option<Rc<RefCell<ClockTable>>>> = RefCell::new(None);
}

/// Per-domain timer hook. Install with [`ClockEvents::factory`]; tasks on
/// a domain with the hook installed can park on [`sleep`] promises.
pub struct ClockEvents {
    table: Rc<RefCell<ClockTable>>,
    interrupter: Arc<Notifier>,
}

impl ClockEvents {
    /// Creates the hook for the calling domain thread and registers its
    /// sleeper table where [`sleep`] can find it.
    #[must_use]
    pub fn install_here() -> Self {
        let table = Rc::new(RefCell::new(ClockTable::new()));
        DOMAIN_CLOCK.with(|slot| {
            *slot.borrow_mut() = Some(table.clone());
        });
        Self {
            table,
            interrupter: Arc::new(Notifier::new()),
        }
    }

    /// Factory installing a clock hook on every domain of the pool.
    #[must_use]
    pub fn factory() -> Arc<dyn EventsFactory> {
        Arc::new(|_domain: DomainId| Box::new(ClockEvents::install_here()) as Box<dyn EventsHook>)
    }
}

impl EventsHook for ClockEvents {
    fn select(&mut self) -> Vec<ReadyTask> {
        let now = Instant::now();
        let wait = {
            let mut table = self.table.borrow_mut();
            let matured = table.take_matured(now);
            if !matured.is_empty() {
                return matured;
            }
            table.nearest(now).unwrap_or(EMPTY_TABLE_PARK)
        };

        self.interrupter.park(wait);
        self.table.borrow_mut().take_matured(Instant::now())
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }

    fn cancel(&mut self, id: PromiseId) {
        self.table.borrow_mut().remove(id);
    }
}

/// Creates a syscall promise that resolves to `()` once `dur` elapsed.
/// The current task typically parks on it with `Step::suspend_on`.
///
/// Panics when the runtime was not built with [`ClockEvents::factory`].
pub fn sleep(scope: &mut Scope, dur: Duration) -> Promise<()> {
    let promise = scope.make(|| ());
    let entry = scope.ready_task(&promise, || ());
    DOMAIN_CLOCK.with(|slot| {
        let table = slot
            .borrow()
            .clone()
            .expect("clock events hook is not installed on this domain");
        table.borrow_mut().sleepers.push(Sleeper {
            at: Instant::now() + dur,
            entry,
        });
    });
    promise
}
