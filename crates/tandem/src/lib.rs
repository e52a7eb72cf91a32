//! tandem is a cooperative concurrency runtime: a fixed pool of worker
//! threads ("domains") each running a single-threaded scheduler loop,
//! with first-class awaitable promises and structured cancellation.
//!
//! Tasks come in two flavors. [`Scope::call`] submits a parallel task to
//! the process-wide dispatcher and runs it on some other domain;
//! [`Scope::call_cc`] spawns a concurrent task interleaving with the
//! caller on its own domain. Both return a [`Promise`]. Task switching is
//! cooperative: a body returns a [`Step`] describing its next suspension
//! point (`done`, `yield_then`, `await_on`, `await_all`, `await_first`,
//! `suspend_on`), and nothing else switches tasks on a domain.
//!
//! External events (timers, I/O readiness) reach the scheduler through a
//! per-domain [`EventsHook`]; [`clock`] ships the timer instance of that
//! interface. Cancellation propagates top-down through the parent/child
//! promise graph, across domain boundaries included.

mod dispatch;
mod domain;
mod errors;
mod events;
mod ids;
mod mail;
mod park;
mod promise;
mod queue;
mod runtime;
mod step;
mod types;

pub mod clock;

pub use domain::Scope;
pub use errors::{PanicFailure, RuntimeError};
pub use events::{EventsFactory, EventsHook, Interrupt, NoEvents, Notifier, ReadyTask};
pub use ids::{DomainId, PromiseId};
pub use promise::Promise;
pub use runtime::Runtime;
pub use step::{Outcome, Step, StepResult};
pub use types::{AnyResult, BoxedError, GenericResult};

// re-exported external libraries
pub use rand::SeedableRng;
