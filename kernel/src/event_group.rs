//! Event group: a 32-bit event bitset with ANY/ALL waits and optional
//! clear-on-exit (§4.6).
use core::cell::Cell;

use crate::critical;
use crate::error::Error;
use crate::port::Port;
use crate::sched::{Kernel, Ticks};
use crate::task::{TaskId, TaskState};
use crate::wait::{self, WaitQueue};

/// Bound on simultaneous waiters per event group. Unlike the other
/// primitives, a waiter here carries extra per-task state (its requested
/// mask, wait mode, and clear-on-exit flag) that the generic intrusive
/// task-queue links have no room for, so that state lives in a small
/// side table sized by this constant instead.
pub const MAX_EVENT_WAITERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Any,
    All,
}

#[derive(Clone, Copy)]
struct WaiterSlot {
    task: TaskId,
    mask: u32,
    mode: WaitMode,
    clear_on_exit: bool,
}

pub struct EventGroup {
    bits: Cell<u32>,
    waiters: WaitQueue,
    slots: [Cell<Option<WaiterSlot>>; MAX_EVENT_WAITERS],
    received: [Cell<u32>; MAX_EVENT_WAITERS],
}

// Safety: `bits`, `slots`, and `received` are only ever touched from
// inside a critical section.
unsafe impl Sync for EventGroup {}

impl EventGroup {
    pub const fn new(initial: u32) -> Self {
        EventGroup {
            bits: Cell::new(initial),
            waiters: WaitQueue::new(),
            slots: [const { Cell::new(None) }; MAX_EVENT_WAITERS],
            received: [const { Cell::new(0) }; MAX_EVENT_WAITERS],
        }
    }

    pub fn get_bits(&self) -> u32 {
        self.bits.get()
    }

    pub fn clear_bits(&self, mask: u32) {
        self.bits.set(self.bits.get() & !mask);
    }

    fn satisfied(current: u32, mask: u32, mode: WaitMode) -> bool {
        match mode {
            WaitMode::Any => current & mask != 0,
            WaitMode::All => current & mask == mask,
        }
    }

    /// Set `mask` into the event word, then wake every waiter whose own
    /// condition is now satisfied (each evaluated independently — §4.6
    /// "Multiple waiters may be woken by one set_bits call"). While
    /// scanning, also evicts slots belonging to tasks that are no longer
    /// `Blocked` (woken by timeout since they last parked, or deleted):
    /// the only place such a slot would otherwise be reclaimed.
    pub fn set_bits<const N: usize, P: Port>(&'static self, kernel: &'static Kernel<N, P>, mask: u32) {
        let mut woken = [None; MAX_EVENT_WAITERS];

        {
            let _g = critical::enter::<P>();
            self.bits.set(self.bits.get() | mask);

            for (i, slot) in self.slots.iter().enumerate() {
                let Some(w) = slot.get() else { continue };
                if kernel.task(w.task).state() != TaskState::Blocked {
                    slot.set(None);
                    continue;
                }
                let current = self.bits.get();
                if Self::satisfied(current, w.mask, w.mode) {
                    let received = current & w.mask;
                    if w.clear_on_exit {
                        self.bits.set(self.bits.get() & !w.mask);
                    }
                    self.received[i].set(received);
                    slot.set(None);
                    woken[i] = Some(w.task);
                }
            }
        }

        for id in woken.into_iter().flatten() {
            kernel.wake_specific(id, Ok(()));
        }
    }

    /// Block until `(current_bits & mask)` satisfies `mode`, or `timeout`
    /// ticks elapse (`0` = forever). Returns the matching bits observed at
    /// wake time; if `clear_on_exit`, those exact bits are cleared from
    /// the event word atomically with the wake.
    pub fn wait_bits<const N: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<N, P>,
        mask: u32,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: Ticks,
    ) -> Result<u32, Error> {
        let requester = kernel.current_task();

        enum Decision {
            Satisfied(u32),
            Parked(usize),
        }

        let decision = {
            let _g = critical::enter::<P>();
            let current = self.bits.get();
            if Self::satisfied(current, mask, mode) {
                let received = current & mask;
                if clear_on_exit {
                    self.bits.set(current & !mask);
                }
                Decision::Satisfied(received)
            } else {
                let slot_index = self.slots.iter().position(|s| s.get().is_none());
                let Some(i) = slot_index else {
                    return Err(Error::MaxReached);
                };
                self.slots[i].set(Some(WaiterSlot {
                    task: requester,
                    mask,
                    mode,
                    clear_on_exit,
                }));
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
                Decision::Parked(i)
            }
        };

        let slot_index = match decision {
            Decision::Satisfied(received) => return Ok(received),
            Decision::Parked(i) => i,
        };

        kernel.reschedule();
        let outcome = kernel.task(requester).wait_result.get();

        // Reclaim the slot if `set_bits` never did (the timeout path).
        {
            let _g = critical::enter::<P>();
            if let Some(w) = self.slots[slot_index].get() {
                if w.task == requester {
                    self.slots[slot_index].set(None);
                }
            }
        }

        outcome?;
        Ok(self.received[slot_index].get())
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new(0)
    }
}
