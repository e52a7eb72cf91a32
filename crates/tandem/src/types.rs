use std::any::Any;

pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

pub type AnyResult<T, E> = std::result::Result<T, E>;

pub type GenericResult<T> = AnyResult<T, BoxedError>;

/// Type-erased value produced by a task or syscall promise. Values must be
/// `Send` because parallel task results cross domain (thread) boundaries.
pub(crate) type BoxedValue = Box<dyn Any + Send>;
