//! Counting semaphore (§4.4).
use core::cell::Cell;

use crate::critical;
use crate::error::Error;
use crate::port::Port;
use crate::sched::{Kernel, Ticks};
use crate::wait::{self, WaitQueue};

/// A counting semaphore. The count is represented as a plain non-negative
/// counter plus an explicit waiter list (§3 permits either representation;
/// this one makes "how many tasks are waiting" directly observable).
pub struct Semaphore {
    count: Cell<u32>,
    waiters: WaitQueue,
}

// Safety: `count` is only ever touched from inside a critical section.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(initial: u32) -> Self {
        Semaphore {
            count: Cell::new(initial),
            waiters: WaitQueue::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.get()
    }

    /// Non-blocking; always succeeds and always increments, waking the
    /// longest-waiting blocked task if any (§4.4 "Post is non-blocking").
    pub fn post<const N: usize, P: Port>(&'static self, kernel: &'static Kernel<N, P>) {
        let woke = {
            let _g = critical::enter::<P>();
            match wait::pop_waiter(kernel.tasks(), &self.waiters) {
                Some(id) => Some(id),
                None => {
                    self.count.set(self.count.get() + 1);
                    None
                }
            }
        };
        // Handing straight to a waiter (rather than incrementing then
        // letting it race a fresh `wait` call for the count) keeps a post
        // that targeted a specific waiter from being stolen by a third
        // task, the same reasoning as `Mutex::unlock`.
        if let Some(id) = woke {
            kernel.wake_specific(id, Ok(()));
        }
    }

    /// Block until the count is positive (decrementing it on success) or
    /// `timeout` ticks elapse (`0` = forever).
    pub fn wait<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
        timeout: Ticks,
    ) -> Result<(), Error> {
        let requester = kernel.current_task();

        let must_block = {
            let _g = critical::enter::<P>();
            if self.count.get() > 0 {
                self.count.set(self.count.get() - 1);
                false
            } else {
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
                true
            }
        };

        if !must_block {
            return Ok(());
        }
        kernel.reschedule();
        kernel.task(requester).wait_result.get()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
