//! Critical-section discipline (§4.9).
//!
//! `enter`/`exit` expose the raw two-step contract the spec requires.
//! [`CriticalCell`] builds the common case — "run this closure with
//! interrupts disabled, then restore" — on top of it, in the spirit of the
//! source's CPU-lock cell: a cell that is only soundly read or written
//! while the lock is held, except here the proof is structural (the
//! closure cannot escape the locked region) rather than a borrowed token
//! threaded by hand through every call site.
use core::cell::UnsafeCell;

use crate::port::Port;

/// An RAII critical-section guard. Interrupts are restored to their prior
/// state when this is dropped.
#[must_use]
pub struct CriticalGuard<P: Port> {
    token: P::CriticalToken,
    _consumed: bool,
}

/// Disable interrupts globally. Nesting is supported; an already-disabled
/// core stays disabled until the outermost guard drops.
///
/// Critical sections must stay short: no blocking operation may be invoked
/// while a [`CriticalGuard`] is alive.
#[inline]
pub fn enter<P: Port>() -> CriticalGuard<P> {
    CriticalGuard {
        token: P::critical_enter(),
        _consumed: false,
    }
}

impl<P: Port> Drop for CriticalGuard<P> {
    #[inline]
    fn drop(&mut self) {
        // Safety: `token` was obtained by this guard's own `critical_enter`
        // call and has not been exited before (guards are not `Copy` and
        // `drop` runs at most once).
        unsafe { P::critical_exit(self.token) };
    }
}

/// A cell that may only be soundly read or written while interrupts are
/// disabled on a single-core target. [`CriticalCell::with`] enforces this
/// by construction: the inner reference cannot outlive the closure.
pub struct CriticalCell<T> {
    inner: UnsafeCell<T>,
}

// Safety: all access goes through `with`, which requires a critical
// section to be held for the duration of the closure, giving exclusive
// access on a single-core target.
unsafe impl<T> Sync for CriticalCell<T> {}

impl<T> CriticalCell<T> {
    pub const fn new(value: T) -> Self {
        CriticalCell {
            inner: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive, interrupt-disabled access to the contents.
    /// Reentrant critical sections are fine (nesting is supported by
    /// `Port`), but calling `with` again on the *same* cell from within
    /// `f` is undefined behavior (aliased `&mut T`) — callers must not do
    /// that.
    #[inline]
    pub fn with<P: Port, R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = enter::<P>();
        // Safety: the guard above excludes every other task and interrupt
        // handler from the entire duration of `f` on a single-core target,
        // and callers are responsible for not re-entering this same cell.
        let value = unsafe { &mut *self.inner.get() };
        f(value)
    }

    /// Access contents when the caller already knows interrupts are
    /// disabled (e.g. deep inside another `with` call on a *different*
    /// cell).
    ///
    /// # Safety
    /// Interrupts must already be disabled, and no other live reference to
    /// this cell's contents may exist.
    #[inline]
    pub unsafe fn with_locked<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let value = unsafe { &mut *self.inner.get() };
        f(value)
    }
}
