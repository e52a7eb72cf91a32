use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::{env, fmt};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::dispatch::Dispatcher;
use crate::domain::{DomainCore, LoopUntil, Scope};
use crate::errors::RuntimeError;
use crate::events::{EventsFactory, NoEvents};
use crate::ids::DomainId;
use crate::mail::{Directory, DomainLink};
use crate::park::{KillSignal, OnDrop};
use crate::step::{erase_body, StepResult};
use crate::types::AnyResult;

static RUNTIME_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Pool size used when the builder does not fix one: the `TANDEM_DOMAINS`
/// environment variable, else available parallelism less one, never below
/// a single domain.
pub(crate) fn get_num_domains() -> usize {
    if let Some(count) = env::var("TANDEM_DOMAINS")
        .ok()
        .and_then(|value| usize::from_str(&value).ok())
    {
        tracing::debug!("domain count {count} from TANDEM_DOMAINS");
        return count.max(1);
    }

    let available = thread::available_parallelism()
        .ok()
        .map_or(1, std::num::NonZero::get);
    available.saturating_sub(1).max(1)
}

/// Builder and entry point of the pool.
///
/// `run` initializes the runtime, spawns the worker domains, executes
/// `body` as the root task on the main domain, and returns the root
/// outcome after joining the pool. Exactly one runtime may run per
/// process at a time.
pub struct Runtime {
    domains: Option<usize>,
    seed: Option<u64>,
    events: Arc<dyn EventsFactory>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("domains", &self.domains)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            domains: None,
            seed: None,
            events: NoEvents::factory(),
        }
    }

    /// Fixes the pool size, counting the main domain.
    #[must_use]
    pub fn domains(mut self, count: usize) -> Self {
        self.domains = Some(count.max(1));
        self
    }

    /// Fixes the seed of the pool generator; per-domain generators and
    /// every scheduling draw derive from it, so runs repeat.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Installs an events hook factory, invoked once per domain on that
    /// domain's thread.
    #[must_use]
    pub fn events(mut self, factory: Arc<dyn EventsFactory>) -> Self {
        self.events = factory;
        self
    }

    /// Runs `body` as the root task and returns its outcome.
    pub fn run<T, F>(self, body: F) -> AnyResult<T, RuntimeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Scope) -> StepResult<T> + 'static,
    {
        assert!(
            RUNTIME_ACTIVE
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok(),
            "only one tandem runtime may run at a time"
        );
        let _active = OnDrop::new(|| RUNTIME_ACTIVE.store(false, Ordering::SeqCst));

        let total = self.domains.unwrap_or_else(get_num_domains);
        let seed = self.seed.unwrap_or_else(|| rand::rng().next_u64());
        let mut pool_rng = ChaCha8Rng::seed_from_u64(seed);

        let span = tracing::trace_span!("Runtime::run", domains = total, seed);
        let _enter = span.enter();

        let directory: Directory =
            Arc::new((0..total).map(|index| DomainLink::new(DomainId(index))).collect());
        let dispatcher = Dispatcher::new();
        let kill = Arc::new(KillSignal::new());

        let mut handles = Vec::with_capacity(total.saturating_sub(1));
        for index in 1..total {
            let worker_seed = pool_rng.next_u64();
            let directory = directory.clone();
            let dispatcher = dispatcher.clone();
            let kill = kill.clone();
            let events = self.events.clone();
            let name = format!("tandem-domain-{index}");

            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let id = DomainId(index);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        directory[index].notifier.bind();
                        let hook = events.install(id);
                        directory[index].publish_interrupter(hook.interrupter());

                        let core = DomainCore::new(
                            id,
                            worker_seed,
                            hook,
                            directory.clone(),
                            dispatcher,
                            kill,
                        );
                        let mut scope = core.scope();
                        core.run_loop(&mut scope, LoopUntil::Shutdown);
                    }));
                    if outcome.is_err() {
                        tracing::error!("worker {name} died on a panic outside task bodies");
                    }
                })
                .expect("worker thread should spawn");
            handles.push(handle);
        }

        let main_seed = pool_rng.next_u64();
        let id = DomainId(0);
        directory[0].notifier.bind();
        let hook = self.events.install(id);
        directory[0].publish_interrupter(hook.interrupter());

        let core = DomainCore::new(
            id,
            main_seed,
            hook,
            directory.clone(),
            dispatcher.clone(),
            kill.clone(),
        );
        let mut scope = core.scope();
        let root = core.spawn_root(erase_body(body));
        core.run_loop(&mut scope, LoopUntil::RootDone(root));
        let outcome = core.take_outcome(root);

        kill.raise();
        dispatcher.gate().open_all();
        for link in directory.iter() {
            link.wake();
        }
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("runtime finished; pool joined");

        outcome.map(|value| {
            *value
                .downcast::<T>()
                .expect("root outcome should match the body type")
        })
    }
}
