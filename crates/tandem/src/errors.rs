use derive_more::derive::From;
use thiserror::Error;

use crate::types::BoxedError;

/// Terminal and call-site errors of the runtime surface.
///
/// `Cancelled` and `UserFailure` are promise outcomes; the remaining
/// variants are reported synchronously at the misusing call site (in the
/// continuation model: the offending task fails with the error instead of
/// its continuation running).
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The promise was cancelled before it could resolve.
    #[error("task was cancelled")]
    Cancelled,

    /// The task's closure returned an error or panicked.
    #[error("task failed: {0}")]
    UserFailure(BoxedError),

    /// A promise outcome may be consumed at most once.
    #[error("promise outcome was already consumed")]
    AlreadyConsumed,

    /// The promise belongs to another domain, or is not a suspension
    /// capable promise of the current domain.
    #[error("promise is foreign to the current domain")]
    ForeignPromise,

    /// `call` needs at least one domain beside the caller's.
    #[error("parallel call requires more than one domain")]
    EmptyDomainPool,

    /// `await_all`/`await_first` require a non-empty promise list.
    #[error("await on an empty promise list")]
    EmptyAwait,
}

impl RuntimeError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RuntimeError::Cancelled)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, RuntimeError::UserFailure(_))
    }
}

/// Carrier for a panic payload captured from a task body.
#[derive(Debug)]
pub struct PanicFailure(pub String);

impl std::error::Error for PanicFailure {}

impl core::fmt::Display for PanicFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task panicked: {}", self.0)
    }
}

/// Errors of the cross-domain submission queue.
#[derive(Debug, From)]
pub enum DispatchError {
    /// The global queue rejected the submission because it is closed.
    QueueClosed,

    /// The global queue rejected the submission because it is full.
    QueueFull,
}

impl std::error::Error for DispatchError {}

impl core::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
