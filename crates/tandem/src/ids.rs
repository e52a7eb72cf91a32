use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique, monotonically issued identity of a promise.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for PromiseId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "promise({})", self.0)
    }
}

/// Identity of a scheduler domain. Domain 0 is the main domain which runs
/// the root task; domains 1..N are pool workers.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct DomainId(pub(crate) usize);

impl DomainId {
    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for DomainId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "domain({})", self.0)
    }
}
