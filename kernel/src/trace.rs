//! Thin `log` wrappers for the few call sites that are not on every tick:
//! task create/delete, mutex contention and inheritance changes, timer
//! fire, and allocator exhaustion. Gated behind the `log` feature so a
//! target with no logger installed pays nothing; with the feature off
//! every function here compiles away to nothing (the argument expressions
//! are still evaluated, same as any `log::trace!` call site when its level
//! is disabled at runtime).
use crate::task::TaskId;

pub fn task_created(id: TaskId, name: &str) {
    #[cfg(feature = "log")]
    log::debug!("task {:?} '{}' created", id, name);
    #[cfg(not(feature = "log"))]
    let _ = (id, name);
}

pub fn task_deleted(id: TaskId) {
    #[cfg(feature = "log")]
    log::debug!("task {:?} deleted", id);
    #[cfg(not(feature = "log"))]
    let _ = id;
}

pub fn mutex_contended(waiter: TaskId, owner: TaskId) {
    #[cfg(feature = "log")]
    log::trace!("task {:?} blocked on mutex held by {:?}", waiter, owner);
    #[cfg(not(feature = "log"))]
    let _ = (waiter, owner);
}

pub fn priority_inherited(owner: TaskId, new_priority: u8) {
    #[cfg(feature = "log")]
    log::trace!("task {:?} inherited priority {}", owner, new_priority);
    #[cfg(not(feature = "log"))]
    let _ = (owner, new_priority);
}

pub fn timer_fired(period: u32) {
    #[cfg(feature = "log")]
    log::trace!("timer fired, period {}", period);
    #[cfg(not(feature = "log"))]
    let _ = period;
}

pub fn alloc_exhausted(requested: usize) {
    #[cfg(feature = "log")]
    log::debug!("allocator exhausted, requested {} bytes", requested);
    #[cfg(not(feature = "log"))]
    let _ = requested;
}
