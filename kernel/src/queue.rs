//! Fixed-capacity ring-buffer message queue (§4.7).
use core::cell::{Cell, UnsafeCell};
use core::mem::MaybeUninit;

use crate::critical;
use crate::error::Error;
use crate::port::Port;
use crate::sched::{Kernel, Ticks};
use crate::wait::{self, WaitQueue};

/// A bounded FIFO of up to `N` items of `T`, moved by value rather than by
/// the spec's raw `item_size`-byte copy (§3 "Items are raw byte copies" —
/// the byte-copy framing is how a C-shaped kernel expresses "any POD item
/// type"; a generic `T` says the same thing more precisely in Rust and
/// still permits a type as small as `()` or as large as a struct).
///
/// Senders block on `not_full`, receivers on `not_empty`; each side wakes
/// one of the other on progress (§9 open question 2 — no polling sleep).
/// Concurrent senders and receivers are serialized the same way every other
/// primitive in this crate is: by the critical section guarding `count`,
/// `head`, and `tail`, which stands in for the spec's "internal mutex"
/// without the overhead of a second blocking object wrapping state this
/// crate already protects uniformly.
pub struct Queue<T, const N: usize> {
    slots: UnsafeCell<[MaybeUninit<T>; N]>,
    head: Cell<usize>,
    tail: Cell<usize>,
    count: Cell<usize>,
    not_full: WaitQueue,
    not_empty: WaitQueue,
}

// Safety: `slots`, `head`, `tail`, and `count` are only ever touched from
// inside a critical section.
unsafe impl<T, const N: usize> Sync for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    pub const fn new() -> Self {
        assert!(N > 0, "queue capacity must be nonzero");
        Queue {
            slots: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
            head: Cell::new(0),
            tail: Cell::new(0),
            count: Cell::new(0),
            not_full: WaitQueue::new(),
            not_empty: WaitQueue::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count.get()
    }

    pub fn is_empty(&self) -> bool {
        self.count.get() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count.get() == N
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Caller must hold the critical section and have already checked
    /// `count < N`.
    fn push_locked(&self, item: T) {
        let tail = self.tail.get();
        // Safety: `tail < N`, and this slot holds no live value (either
        // never written, or its previous occupant was moved out by
        // `pop_locked` before `count` allowed this slot to be reused).
        unsafe {
            (*self.slots.get())[tail].write(item);
        }
        self.tail.set((tail + 1) % N);
        self.count.set(self.count.get() + 1);
    }

    /// Caller must hold the critical section and have already checked
    /// `count > 0`.
    fn pop_locked(&self) -> T {
        let head = self.head.get();
        // Safety: `head` names a slot written by `push_locked` and not yet
        // popped, per `count > 0`.
        let item = unsafe { (*self.slots.get())[head].assume_init_read() };
        self.head.set((head + 1) % N);
        self.count.set(self.count.get() - 1);
        item
    }

    /// Send `item`, blocking while the queue is full, for at most `timeout`
    /// ticks (`0` = forever). On timeout `item` is dropped along with the
    /// rest of the call frame, same as any other owned value that fails to
    /// find a home.
    pub fn send<const M: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<M, P>,
        item: T,
        timeout: Ticks,
    ) -> Result<(), Error> {
        let requester = kernel.current_task();
        let deadline = if timeout == 0 {
            None
        } else {
            Some(kernel.tick_count() + timeout as u64)
        };
        let mut pending = Some(item);

        loop {
            let sent = {
                let _g = critical::enter::<P>();
                if self.count.get() < N {
                    self.push_locked(pending.take().unwrap());
                    true
                } else {
                    wait::park(
                        kernel.tasks(),
                        kernel.timeouts(),
                        Some(&self.not_full),
                        requester,
                        deadline,
                    );
                    false
                }
            };

            if sent {
                kernel.wake_one(&self.not_empty, Ok(()));
                return Ok(());
            }
            kernel.reschedule();
            kernel.task(requester).wait_result.get()?;
        }
    }

    /// Receive an item, blocking while the queue is empty, for at most
    /// `timeout` ticks (`0` = forever).
    pub fn receive<const M: usize, P: Port>(
        &'static self,
        kernel: &'static Kernel<M, P>,
        timeout: Ticks,
    ) -> Result<T, Error> {
        let requester = kernel.current_task();
        let deadline = if timeout == 0 {
            None
        } else {
            Some(kernel.tick_count() + timeout as u64)
        };

        loop {
            let received = {
                let _g = critical::enter::<P>();
                if self.count.get() > 0 {
                    Some(self.pop_locked())
                } else {
                    wait::park(
                        kernel.tasks(),
                        kernel.timeouts(),
                        Some(&self.not_empty),
                        requester,
                        deadline,
                    );
                    None
                }
            };

            if let Some(item) = received {
                kernel.wake_one(&self.not_full, Ok(()));
                return Ok(item);
            }
            kernel.reschedule();
            kernel.task(requester).wait_result.get()?;
        }
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Queue<T, N> {
    fn drop(&mut self) {
        while self.count.get() > 0 {
            self.pop_locked();
        }
    }
}
