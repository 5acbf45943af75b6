//! The single error taxonomy shared by every fallible kernel operation.
use core::fmt;

/// Every fallible operation in this crate returns `Result<T, Error>`. The
/// kernel never panics or unwinds on a caller mistake; callers decide
/// whether to retry, log, or terminate the offending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Null/out-of-range argument, misaligned address, or zero-size request.
    InvalidParam,
    /// Allocator exhaustion, or a fixed-capacity pool (tasks, timers) is full.
    NoMemory,
    /// A blocking operation did not complete within its deadline.
    Timeout,
    /// `unlock` by a non-owner, or a protected-memory write.
    PermissionDenied,
    /// The object is already in the state the caller is trying to put it in
    /// (double `init`, restarting an already-active timer that forbids it,
    /// and similar misuse).
    Busy,
    /// A fixed-capacity resource (the task pool) already holds an object
    /// with this identity.
    AlreadyExists,
    /// A fixed-capacity limit (max tasks, max timers) has been reached.
    MaxReached,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::InvalidParam => "invalid parameter",
            Error::NoMemory => "out of memory",
            Error::Timeout => "operation timed out",
            Error::PermissionDenied => "permission denied",
            Error::Busy => "object busy",
            Error::AlreadyExists => "object already exists",
            Error::MaxReached => "fixed-capacity limit reached",
        };
        f.write_str(s)
    }
}
