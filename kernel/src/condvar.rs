//! Condition variable, bound to a mutex at wait time rather than at
//! construction (§4.5).
use core::cell::Cell;

use crate::critical;
use crate::error::Error;
use crate::mutex::Mutex;
use crate::port::Port;
use crate::sched::{Kernel, Ticks};
use crate::wait::{self, WaitQueue};

pub struct CondVar {
    waiters: WaitQueue,
    waiter_count: Cell<u32>,
}

// Safety: `waiter_count` is only ever touched from inside a critical
// section.
unsafe impl Sync for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            waiters: WaitQueue::new(),
            waiter_count: Cell::new(0),
        }
    }

    pub fn waiter_count(&self) -> u32 {
        self.waiter_count.get()
    }

    /// Atomically release `mutex` and park on this condition variable;
    /// re-acquires `mutex` before returning, regardless of whether woken
    /// by [`CondVar::signal`]/[`CondVar::broadcast`] or by timeout (§4.5
    /// "re-acquisition... does not return Timeout" — only the return value
    /// reports the original wait outcome).
    ///
    /// Precondition: the calling task holds `mutex`. Violating this is a
    /// contract error, reported as `PermissionDenied` rather than risking
    /// an inconsistent park.
    pub fn wait<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
        mutex: &'static Mutex,
        timeout: Ticks,
    ) -> Result<(), Error> {
        let requester = kernel.current_task();
        if mutex.owner() != Some(requester) {
            return Err(Error::PermissionDenied);
        }

        // Enqueue before releasing the mutex: a `signal`/`broadcast` that
        // races in after `unlock` returns will then always find us in the
        // queue, so no wakeup between unlock and park can be lost.
        {
            let _g = critical::enter::<P>();
            let deadline = if timeout == 0 {
                None
            } else {
                Some(kernel.tick_count() + timeout as u64)
            };
            wait::park(
                kernel.tasks(),
                kernel.timeouts(),
                Some(&self.waiters),
                requester,
                deadline,
            );
            self.waiter_count.set(self.waiter_count.get() + 1);
        }

        mutex.unlock(kernel)?;
        kernel.reschedule();
        let outcome = kernel.task(requester).wait_result.get();

        {
            let _g = critical::enter::<P>();
            self.waiter_count.set(self.waiter_count.get() - 1);
        }

        mutex.lock(kernel)?;
        outcome
    }

    /// Wake the longest-waiting task, if any.
    pub fn signal<const N: usize, P: Port>(&'static self, kernel: &'static Kernel<N, P>) {
        kernel.wake_one(&self.waiters, Ok(()));
    }

    /// Wake every waiting task.
    pub fn broadcast<const N: usize, P: Port>(&'static self, kernel: &'static Kernel<N, P>) {
        kernel.wake_all(&self.waiters, Ok(()));
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
