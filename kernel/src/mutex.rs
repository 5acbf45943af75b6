//! Priority-inheritance mutex (§4.3).
use core::cell::Cell;

use crate::critical;
use crate::error::Error;
use crate::port::Port;
use crate::sched::{Kernel, Ticks};
use crate::task::TaskId;
use crate::wait::{self, WaitQueue};

/// A binary lock that raises its owner's effective priority to match a
/// blocked higher-priority contender, for the duration of ownership (§4.3
/// "Inheritance protocol"). Re-entrant locking by the same task is a
/// contract violation (§3) and is not detected.
///
/// This tracks only the single most recently inherited priority, matching
/// the limitation documented at §9 open question 1: it does not chain
/// boosts across multiple held mutexes, and `unlock` unconditionally
/// resets the owner's effective priority to its base rather than to "the
/// next-highest priority still owed from some other held mutex" (nothing
/// tracks that). A task holding two mutexes can therefore have an
/// inherited boost from one cleared by unlocking the unrelated other. Both
/// this and full chaining are defensible per §9; this is the simpler of
/// the two and is documented here rather than silently assumed.
pub struct Mutex {
    owner: Cell<Option<TaskId>>,
    waiters: WaitQueue,
}

// Safety: `owner` is only ever touched from inside a critical section.
unsafe impl Sync for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            owner: Cell::new(None),
            waiters: WaitQueue::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.owner.get().is_some()
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.owner.get()
    }

    /// Acquire the mutex, blocking indefinitely if already held.
    pub fn lock<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
    ) -> Result<(), Error> {
        self.lock_timeout(kernel, 0)
    }

    /// Acquire the mutex, blocking at most `timeout` ticks (`0` = forever,
    /// per §4.3 "Timeouts").
    pub fn lock_timeout<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
        timeout: Ticks,
    ) -> Result<(), Error> {
        let requester = kernel.current_task();

        // Atomically: if free, claim it; otherwise enqueue ourselves on
        // `waiters` right here, in the same critical section that observed
        // contention, so a concurrent `unlock` can never find the queue
        // still empty and fail to wake us.
        let contended_owner = {
            let _g = critical::enter::<P>();
            match self.owner.get() {
                None => {
                    self.owner.set(Some(requester));
                    None
                }
                Some(owner_id) => {
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
                    Some(owner_id)
                }
            }
        };

        let owner_id = match contended_owner {
            None => return Ok(()),
            Some(owner_id) => owner_id,
        };

        crate::trace::mutex_contended(requester, owner_id);

        // Only now, outside any critical section of our own, may we call
        // anything that might itself trigger a reschedule.
        let requester_prio = kernel.task(requester).effective_priority();
        let owner_prio = kernel.task(owner_id).effective_priority();
        if requester_prio.is_higher_than(owner_prio) {
            kernel.raise_priority(owner_id, requester_prio)?;
            crate::trace::priority_inherited(owner_id, requester_prio.get());
        }
        kernel.reschedule();
        kernel.task(requester).wait_result.get()
    }

    /// Release the mutex. Calling this from a task other than the current
    /// owner is a contract violation (§3), reported as `PermissionDenied`
    /// rather than left undefined.
    pub fn unlock<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
    ) -> Result<(), Error> {
        let current = kernel.current_task();

        let next_owner = {
            let _g = critical::enter::<P>();
            if self.owner.get() != Some(current) {
                return Err(Error::PermissionDenied);
            }
            self.owner.set(None);
            wait::pop_waiter(kernel.tasks(), &self.waiters)
        };

        kernel.reset_priority(current)?;

        if let Some(next_id) = next_owner {
            {
                let _g = critical::enter::<P>();
                self.owner.set(Some(next_id));
            }
            // Hand the lock directly to the popped waiter rather than just
            // clearing `owner` and letting it race other lockers for it.
            kernel.wake_specific(next_id, Ok(()));
        }
        Ok(())
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
