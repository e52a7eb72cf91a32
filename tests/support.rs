//! Shared helpers for the scenario tests: an in-memory duplex byte pipe
//! wired into the events interface, standing in for non-blocking sockets.
//! Lane 0 carries client-to-server bytes, lane 1 the reverse direction.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tandem::{
    DomainId, EventsFactory, EventsHook, Interrupt, Notifier, Promise, PromiseId, ReadyTask, Scope,
};

const PIPE_POLL: Duration = Duration::from_millis(20);

struct Lane {
    bytes: VecDeque<u8>,
}

/// The shared byte store. Writers may sit on any domain; every write wakes
/// every installed hook so blocked readers re-check their lanes.
pub struct Pipe {
    lanes: Mutex<[Lane; 2]>,
    wakers: Mutex<Vec<Arc<dyn Interrupt>>>,
}

impl Pipe {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lanes: Mutex::new([
                Lane {
                    bytes: VecDeque::new(),
                },
                Lane {
                    bytes: VecDeque::new(),
                },
            ]),
            wakers: Mutex::new(Vec::new()),
        })
    }

    pub fn write(&self, lane: usize, data: &[u8]) {
        {
            let mut lanes = self.lanes.lock().expect("pipe lock poisoned");
            lanes[lane].bytes.extend(data.iter().copied());
        }
        for waker in self.wakers.lock().expect("pipe lock poisoned").iter() {
            waker.interrupt();
        }
    }

    fn available(&self, lane: usize) -> usize {
        self.lanes.lock().expect("pipe lock poisoned")[lane].bytes.len()
    }

    fn take_exact(&self, lane: usize, count: usize) -> Vec<u8> {
        let mut lanes = self.lanes.lock().expect("pipe lock poisoned");
        assert!(
            lanes[lane].bytes.len() >= count,
            "reader resolved before its bytes arrived"
        );
        lanes[lane].bytes.drain(..count).collect()
    }

    fn register_waker(&self, waker: Arc<dyn Interrupt>) {
        self.wakers.lock().expect("pipe lock poisoned").push(waker);
    }
}

struct PipeWaiter {
    lane: usize,
    need: usize,
    entry: ReadyTask,
}

thread_local! {
    static DOMAIN_PIPE: RefCell<Option<Rc<RefCell<Vec<PipeWaiter>>>>> = RefCell::new(None);
}

/// Per-domain events hook over a [`Pipe`]: `select` hands back the readers
/// whose lanes hold enough bytes, parking briefly otherwise.
pub struct PipeEvents {
    pipe: Arc<Pipe>,
    waiters: Rc<RefCell<Vec<PipeWaiter>>>,
    interrupter: Arc<Notifier>,
}

impl PipeEvents {
    fn install_here(pipe: Arc<Pipe>) -> Self {
        let waiters = Rc::new(RefCell::new(Vec::new()));
        DOMAIN_PIPE.with(|slot| {
            *slot.borrow_mut() = Some(waiters.clone());
        });
        let interrupter = Arc::new(Notifier::new());
        pipe.register_waker(interrupter.clone());
        Self {
            pipe,
            waiters,
            interrupter,
        }
    }

    #[must_use]
    pub fn factory(pipe: Arc<Pipe>) -> Arc<dyn EventsFactory> {
        Arc::new(move |_domain: DomainId| {
            Box::new(PipeEvents::install_here(pipe.clone())) as Box<dyn EventsHook>
        })
    }

    fn take_ready(&self) -> Vec<ReadyTask> {
        let mut waiters = self.waiters.borrow_mut();
        let mut ready = Vec::new();
        let mut index = 0;
        while index < waiters.len() {
            if self.pipe.available(waiters[index].lane) >= waiters[index].need {
                ready.push(waiters.swap_remove(index).entry);
            } else {
                index += 1;
            }
        }
        ready
    }
}

impl EventsHook for PipeEvents {
    fn select(&mut self) -> Vec<ReadyTask> {
        let ready = self.take_ready();
        if !ready.is_empty() {
            return ready;
        }
        self.interrupter.park(PIPE_POLL);
        self.take_ready()
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }

    fn cancel(&mut self, id: PromiseId) {
        self.waiters
            .borrow_mut()
            .retain(|waiter| waiter.entry.promise_uid() != id);
    }
}

/// Creates a syscall promise resolving to exactly `need` bytes from
/// `lane`, registered with the calling domain's pipe hook. The caller
/// parks on it with `Step::suspend_on`.
pub fn read_exact(
    scope: &mut Scope,
    pipe: &Arc<Pipe>,
    lane: usize,
    need: usize,
) -> Promise<Vec<u8>> {
    let source = pipe.clone();
    let promise = scope.make(move || source.take_exact(lane, need));
    let entry = scope.ready_task(&promise, || ());
    DOMAIN_PIPE.with(|slot| {
        let waiters = slot
            .borrow()
            .clone()
            .expect("pipe events hook is not installed on this domain");
        waiters.borrow_mut().push(PipeWaiter { lane, need, entry });
    });
    promise
}
